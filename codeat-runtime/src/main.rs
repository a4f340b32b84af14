mod store;

use anyhow::{anyhow, Result};
use clap::{arg, ArgAction, ArgMatches, Command};
use codeat_nnet::{
    Collaborators, FixedTransform, Frozen, Identity, Outputs, TrainingLoop, Xent,
};
use codeat_structs::config::TrainConfig;
use codeat_utils::{jsonify, jsonify_pretty, load_json_arg, write_obj};
use std::path::{Path, PathBuf};
use store::{
    load_codes, load_features, load_labels, load_nnet, open_groups, CodeArchive, ModelFile,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CODE_FLUSH_INTERVAL: usize = 100;

fn cli() -> Command {
    Command::new("codeat-train")
        .about("Trains code-adaptive layers in front of a frozen network, one code per group")
        .arg_required_else_help(true)
        .arg(
            arg!(<ADAPT_MODEL> "Adaptation network containing the codeat layers")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(<BACK_MODEL> "Frozen network applied after the adaptation network")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(<FEATURES> "Feature archive (utterance -> frames)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(<ALIGNMENTS> "Alignment archive (utterance -> targets)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(<SET2UTT> "Group list, one `group utt1 utt2 ...` line per group")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(<CODES> "Code archive (group -> code vector)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(--config [CONFIG] "Base configuration json string or path to json file")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            arg!(--"feature-transform" [FEATURE_TRANSFORM] "Network applied to the features before caching")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            arg!(--bunchsize [BUNCHSIZE] "Frames per bunch (default 512)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            arg!(--cachesize [CACHESIZE] "Frames held by the shuffle cache (default 32768)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            arg!(--seed [SEED] "Seed of the utterance shuffle and frame randomization (default 777)")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            arg!(--randomize [RANDOMIZE] "Permute the frames of each cache fill (default true)")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            arg!(--shuffle [SHUFFLE] "Shuffle the utterances of each group (default true)")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            arg!(--"max-frames" [MAX_FRAMES] "Skip utterances longer than this (default 6000)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            arg!(--"cross-validate" "Evaluate only: no updates and nothing written")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"update-weight" [BOOL] "Update the weights and biases of the codeat layers")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            arg!(--"update-code-xform" [BOOL] "Update the code transforms of the codeat layers")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            arg!(--"update-code-vec" [BOOL] "Update the group codes")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            arg!(--"out-adapt-filename" [OUT_ADAPT_FILENAME] "Where the trained adaptation network is written")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            arg!(--"out-codes" [OUT_CODES] "Where the trained group codes are written")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            arg!(--"learn-rate" [LEARN_RATE] "Learning rate (default 0.008)")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            arg!(--momentum [MOMENTUM] "Momentum (default 0)")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            arg!(--"l2-penalty" [L2_PENALTY] "L2 penalty on the trained parameters (default 0)")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            arg!(--"allow-overwrite" "Allow a group code to be written more than once")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--compress "Write the output network and codes as zlib")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--report [REPORT] "If set, the run report is also saved to this json file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    if let Err(e) = train(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a Path> {
    matches
        .get_one::<PathBuf>(id)
        .map(PathBuf::as_path)
        .ok_or_else(|| anyhow!("Missing argument {}", id))
}

/// Base configuration from `--config`, overridden by every flag given on the
/// command line.
pub fn build_config(matches: &ArgMatches) -> Result<TrainConfig> {
    let mut config: TrainConfig = match matches.get_one::<String>("config") {
        Some(arg) => load_json_arg(arg)?,
        None => TrainConfig::default(),
    };
    if let Some(&bunch_size) = matches.get_one::<usize>("bunchsize") {
        config.bunch_size = bunch_size;
    }
    if let Some(&cache_size) = matches.get_one::<usize>("cachesize") {
        config.cache_size = cache_size;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = seed;
    }
    if let Some(&randomize) = matches.get_one::<bool>("randomize") {
        config.randomize = randomize;
    }
    if let Some(&shuffle) = matches.get_one::<bool>("shuffle") {
        config.shuffle = shuffle;
    }
    if let Some(&max_frames) = matches.get_one::<usize>("max-frames") {
        config.max_frames = max_frames;
    }
    if matches.get_flag("cross-validate") {
        config.cross_validate = true;
    }
    if let Some(&weights) = matches.get_one::<bool>("update-weight") {
        config.updates.weights = weights;
    }
    if let Some(&code_xform) = matches.get_one::<bool>("update-code-xform") {
        config.updates.code_xform = code_xform;
    }
    if let Some(&code_vec) = matches.get_one::<bool>("update-code-vec") {
        config.updates.code_vec = code_vec;
    }
    if let Some(path) = matches.get_one::<String>("out-adapt-filename") {
        config.outputs.adapt_model = Some(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("out-codes") {
        config.outputs.codes = Some(path.clone());
    }
    if let Some(&learn_rate) = matches.get_one::<f32>("learn-rate") {
        config.train_options.learn_rate = learn_rate;
    }
    if let Some(&momentum) = matches.get_one::<f32>("momentum") {
        config.train_options.momentum = momentum;
    }
    if let Some(&l2_penalty) = matches.get_one::<f32>("l2-penalty") {
        config.train_options.l2_penalty = l2_penalty;
    }
    if matches.get_flag("allow-overwrite") {
        config.allow_code_overwrite = true;
    }
    if matches.get_flag("compress") {
        config.outputs.compress = true;
    }
    Ok(config)
}

pub fn train(matches: &ArgMatches) -> Result<()> {
    let config = build_config(matches)?;
    info!("Configuration: {}", jsonify(&config)?);

    // output destinations only matter when something is trained
    let compress = config.outputs.compress;
    let mut code_out = match (&config.outputs.codes, config.persists_codes()) {
        (Some(path), true) => Some(CodeArchive::new(
            PathBuf::from(path),
            compress,
            CODE_FLUSH_INTERVAL,
        )),
        _ => None,
    };
    let mut model_out = match (&config.outputs.adapt_model, config.persists_network()) {
        (Some(path), true) => Some(ModelFile::new(PathBuf::from(path), compress)),
        _ => None,
    };

    let adapt = load_nnet(required(matches, "ADAPT_MODEL")?)?;
    let mut backend = Frozen::new(load_nnet(required(matches, "BACK_MODEL")?)?);
    let mut transform: Box<dyn FixedTransform> =
        match matches.get_one::<PathBuf>("feature-transform") {
            Some(path) => Box::new(load_nnet(path)?),
            None => Box::new(Identity),
        };
    let mut features = load_features(required(matches, "FEATURES")?)?;
    let mut labels = load_labels(required(matches, "ALIGNMENTS")?)?;
    let codes = load_codes(required(matches, "CODES")?)?;
    let groups = open_groups(required(matches, "SET2UTT")?)?;
    let mut loss = Xent::new();

    let mut trainer = TrainingLoop::new(config, adapt)?;
    let mut io = Collaborators {
        features: &mut features,
        labels: &mut labels,
        codes: &codes,
        transform: transform.as_mut(),
        backend: &mut backend,
        loss: &mut loss,
    };
    let mut outputs = Outputs {
        codes: code_out
            .as_mut()
            .map(|store| store as &mut dyn codeat_nnet::CodeStore),
        model: model_out
            .as_mut()
            .map(|sink| sink as &mut dyn codeat_nnet::ModelSink),
    };
    let result = trainer.run(groups, &mut io, &mut outputs);

    // completed groups are kept even when the run fails
    if let Some(archive) = code_out.as_mut() {
        archive.flush()?;
        info!("Written {} group codes", archive.len());
    }
    let report = result?;
    println!("{}", jsonify_pretty(&report)?);
    if let Some(path) = matches.get_one::<PathBuf>("report") {
        write_obj(path, &report, false)?;
    }
    Ok(())
}
