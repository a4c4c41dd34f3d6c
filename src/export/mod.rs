//! ONNX export of fitted pipelines
//!
//! The protobuf messages are declared by hand in `proto` and encoded with prost.

pub mod onnx;
pub mod proto;

pub use onnx::{
    build_model, export_onnx, read_onnx, write_onnx, LABEL_OUTPUT, PROBABILITIES_OUTPUT,
};
pub use proto::ModelProto;
