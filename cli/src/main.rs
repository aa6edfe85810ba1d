#[macro_use]
extern crate log;

use std::process;

use onnxport_core::internal::*;

mod params;

fn main() {
    use clap::*;
    let app = App::new("onnxport")
        .version(crate_version!())
        .about("Export a YOLOX checkpoint to ONNX")
        .arg(
            Arg::new("exp_file")
                .short('f')
                .long("exp_file")
                .takes_value(true)
                .value_name("EXP")
                .help("Experiment description (JSON)"),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .takes_value(true)
                .value_name("TYPE")
                .help("Model type without experiment file: yolox-s, -m, -l, -x, -tiny, -nano"),
        )
        .arg(
            Arg::new("weights")
                .long("weights")
                .takes_value(true)
                .value_name("CKPT")
                .help("Checkpoint to export (.npz)"),
        )
        .arg(
            Arg::new("img_size")
                .long("img-size")
                .takes_value(true)
                .multiple_values(true)
                .min_values(1)
                .max_values(2)
                .value_name("SIZE")
                .help("Input height and width, a single value for a square input"),
        )
        .arg(
            Arg::new("batch_size")
                .long("batch-size")
                .takes_value(true)
                .default_value("1")
                .help("Batch size of the traced input"),
        )
        .arg(Arg::new("dynamic").long("dynamic").help("Symbolic batch axis"))
        .arg(
            Arg::new("decode_in_inference")
                .long("decode_in_inference")
                .help("Decode boxes in the exported graph"),
        )
        .arg(
            Arg::new("onnx_filename")
                .long("onnx-filename")
                .takes_value(true)
                .value_name("NAME")
                .help("Artifact file name, derived from the checkpoint by default"),
        )
        .arg(
            Arg::new("output_dir")
                .long("output-dir")
                .takes_value(true)
                .value_name("DIR")
                .default_value(onnxport_libcli::params::DEFAULT_OUTPUT_DIR)
                .help("Where to write the artifact"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .multiple_occurrences(true)
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::new("opts")
                .multiple_values(true)
                .value_name("KEY=VALUE")
                .help("Experiment overrides"),
        );

    let matches = app.get_matches();

    let level = match matches.occurrences_of("verbosity") {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins when set
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();

    if let Err(e) = handle(&matches) {
        error!("{e:?}");
        process::exit(1)
    }
}

fn handle(matches: &clap::ArgMatches) -> ExportResult<()> {
    let params = params::from_clap(matches)?;
    let report = onnxport_libcli::export(&params)?;
    if let Err(e) = &report.repair {
        debug!("Repair skipped: {e}");
    }
    info!("Exported {} with input {}", report.path.display(), report.shape);
    Ok(())
}
