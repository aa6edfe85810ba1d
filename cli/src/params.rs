use std::path::PathBuf;

use onnxport_core::internal::*;
use onnxport_libcli::ExportParams;

pub fn from_clap(matches: &clap::ArgMatches) -> ExportResult<ExportParams> {
    let img_size = if matches.is_present("img_size") {
        Some(matches.values_of_t::<usize>("img_size").context("Parsing --img-size")?)
    } else {
        None
    };
    let batch_size = matches.value_of_t::<usize>("batch_size").context("Parsing --batch-size")?;
    let output_dir = matches.value_of("output_dir").map(PathBuf::from).unwrap_or_default();
    Ok(ExportParams {
        exp_file: matches.value_of("exp_file").map(PathBuf::from),
        model_type: matches.value_of("type").map(String::from),
        weights: matches.value_of("weights").map(PathBuf::from),
        img_size,
        batch_size,
        dynamic: matches.is_present("dynamic"),
        decode_in_inference: matches.is_present("decode_in_inference"),
        onnx_filename: matches.value_of("onnx_filename").map(String::from),
        output_dir,
        opts: matches.values_of("opts").map(|v| v.map(String::from).collect()).unwrap_or_default(),
    })
}
