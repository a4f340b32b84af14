use crate::{compress_obj, decompress_obj, dejsonify, jsonify};
use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io::BufRead, path::Path};

/// Files with this extension hold zlib-compressed JSON.
pub const COMPRESSED_EXTENSION: &str = "zlib";

pub fn is_compressed_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext == COMPRESSED_EXTENSION)
}

pub fn read_obj<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if is_compressed_path(path) {
        let bytes =
            fs::read(path).map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        decompress_obj(&bytes)
    } else {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        dejsonify(&text).map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))
    }
}

pub fn write_obj<T, P>(path: P, obj: &T, compress: bool) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let bytes = if compress {
        compress_obj(obj)?
    } else {
        jsonify(obj)?.into_bytes()
    };
    fs::write(path, bytes).map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))
}

/// Accepts either inline JSON or a path to a `.json` file.
pub fn load_json_arg<T>(arg: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    if arg.ends_with(".json") {
        read_obj(arg)
    } else {
        dejsonify(arg).map_err(|e| anyhow!("Failed to parse json argument: {}", e))
    }
}

/// Lazily reads `key token token ...` lines. Blank lines are ignored; a key
/// with no tokens yields an empty list.
pub struct TokenListReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> TokenListReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Number of lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for TokenListReader<R> {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(anyhow!("Failed to read line: {}", e))),
            };
            self.line_no += 1;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            return Some(Ok((
                key.to_string(),
                tokens.map(|t| t.to_string()).collect(),
            )));
        }
    }
}

