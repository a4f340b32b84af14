use codeat_utils::{is_compressed_path, load_json_arg, read_obj, write_obj, TokenListReader};
use std::{collections::BTreeMap, io::Cursor, path::PathBuf};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("codeat-utils-{}-{}", std::process::id(), name))
}

#[test]
fn test_token_list_reader() {
    let text = "spk1 utt1 utt2\n\n  spk2   utt3\nspk3\n";
    let mut reader = TokenListReader::new(Cursor::new(text));
    assert_eq!(
        reader.next().unwrap().unwrap(),
        (
            "spk1".to_string(),
            vec!["utt1".to_string(), "utt2".to_string()]
        )
    );
    assert_eq!(
        reader.next().unwrap().unwrap(),
        ("spk2".to_string(), vec!["utt3".to_string()])
    );
    assert_eq!(
        reader.next().unwrap().unwrap(),
        ("spk3".to_string(), Vec::<String>::new())
    );
    assert!(reader.next().is_none());
    assert_eq!(reader.lines_read(), 4);
}

#[test]
fn test_write_and_read_obj() {
    let mut codes = BTreeMap::new();
    codes.insert("a".to_string(), vec![1.0f32, 2.0]);

    for (name, compress) in [("codes.json", false), ("codes.zlib", true)] {
        let path = temp_path(name);
        write_obj(&path, &codes, compress).unwrap();
        assert_eq!(is_compressed_path(&path), compress);
        let read: BTreeMap<String, Vec<f32>> = read_obj(&path).unwrap();
        assert_eq!(read, codes);
        std::fs::remove_file(&path).unwrap();
    }
}

#[test]
fn test_load_json_arg_inline() {
    let value: BTreeMap<String, u32> = load_json_arg(r#"{"bunch_size": 4}"#).unwrap();
    assert_eq!(value["bunch_size"], 4);
}

#[test]
fn test_read_obj_missing_file() {
    let err = read_obj::<BTreeMap<String, u32>, _>(temp_path("missing.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}
