//! ONNX graph builder for a fitted `InterventionPipeline`
//!
//! Graph layout:
//! numeric inputs → Concat → Scaler ┐
//! category input → OneHotEncoder → Reshape ┴→ Concat → per-fold
//! TreeEnsembleRegressor → Mul/Add/Sigmoid → Sum/Div → `probabilities`, `label`

use crate::config::OnnxOptions;
use crate::error::TrainError;
use crate::export::proto::{
    attribute_type, data_type, tensor_shape_proto, type_proto, AttributeProto, GraphProto,
    ModelProto, NodeProto, OperatorSetIdProto, StringStringEntryProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};
use crate::model::{CalibratedFold, GradientBoostingClassifier};
use crate::pipeline::InterventionPipeline;
use crate::{NUDGE_VERSION, PRODUCER_NAME};
use prost::Message;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const IR_VERSION: i64 = 8;
pub const ML_DOMAIN: &str = "ai.onnx.ml";

pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITIES_OUTPUT: &str = "probabilities";

/// Encode the pipeline as an ONNX model
pub fn export_onnx(
    pipeline: &InterventionPipeline,
    options: &OnnxOptions,
) -> Result<Vec<u8>, TrainError> {
    let model = build_model(pipeline, options)?;
    Ok(model.encode_to_vec())
}

/// Encode the pipeline and write it to `path`
pub fn write_onnx(
    pipeline: &InterventionPipeline,
    options: &OnnxOptions,
    path: &Path,
) -> Result<(), TrainError> {
    let bytes = export_onnx(pipeline, options)?;
    fs::write(path, &bytes)?;
    debug!(bytes = bytes.len(), path = %path.display(), "wrote ONNX model");
    Ok(())
}

/// Decode an ONNX file
pub fn read_onnx(path: &Path) -> Result<ModelProto, TrainError> {
    let bytes = fs::read(path)?;
    ModelProto::decode(bytes.as_slice()).map_err(|e| TrainError::ExportError(e.to_string()))
}

/// Build the model message without encoding it
pub fn build_model(
    pipeline: &InterventionPipeline,
    options: &OnnxOptions,
) -> Result<ModelProto, TrainError> {
    pipeline.validate()?;
    if options.target_opset < 13 {
        // ArgMax keepdims handling and Reshape with -1 below assume opset >= 13
        return Err(TrainError::ExportError(format!(
            "target opset {} is below the supported minimum 13",
            options.target_opset
        )));
    }
    if options.ml_opset < 1 {
        return Err(TrainError::ExportError(format!(
            "invalid ai.onnx.ml opset {}",
            options.ml_opset
        )));
    }

    let mut graph = GraphBuilder::new(&options.graph_name);
    let preprocessor = &pipeline.preprocessor;

    // Inputs: one float column per numeric feature, one string column for the category
    for name in &preprocessor.numeric_features {
        graph.input(name, data_type::FLOAT, &[None, Some(1)]);
    }
    graph.input(
        &preprocessor.categorical_feature,
        data_type::STRING,
        &[None, Some(1)],
    );

    // Numeric block
    graph.node(
        "Concat",
        "",
        preprocessor.numeric_features.clone(),
        "numeric_block",
        vec![attr_int("axis", 1)],
    );
    let scale: Vec<f32> = preprocessor
        .scaler
        .scale
        .iter()
        .map(|s| (1.0 / s) as f32)
        .collect();
    graph.node(
        "Scaler",
        ML_DOMAIN,
        vec!["numeric_block".to_string()],
        "numeric_scaled",
        vec![
            attr_floats("offset", to_f32(&preprocessor.scaler.mean)),
            attr_floats("scale", scale),
        ],
    );

    // Categorical block: [N, 1] strings → [N, 1, C] → [N, C]
    let categories = &preprocessor.encoder.categories;
    graph.node(
        "OneHotEncoder",
        ML_DOMAIN,
        vec![preprocessor.categorical_feature.clone()],
        "category_onehot_3d",
        vec![
            attr_strings("cats_strings", categories),
            attr_int("zeros", 1),
        ],
    );
    graph.initializer(int64_tensor(
        "category_shape",
        vec![-1, categories.len() as i64],
    ));
    graph.node(
        "Reshape",
        "",
        vec!["category_onehot_3d".to_string(), "category_shape".to_string()],
        "category_onehot",
        Vec::new(),
    );

    graph.node(
        "Concat",
        "",
        vec!["numeric_scaled".to_string(), "category_onehot".to_string()],
        "features",
        vec![attr_int("axis", 1)],
    );

    // Calibrated members
    let folds = &pipeline.classifier.folds;
    let mut member_outputs = Vec::with_capacity(folds.len());
    for (idx, fold) in folds.iter().enumerate() {
        member_outputs.push(add_calibrated_fold(&mut graph, idx, fold));
    }

    graph.node("Sum", "", member_outputs, "positive_sum", Vec::new());
    graph.initializer(float_tensor("fold_count", vec![folds.len() as f32]));
    graph.node(
        "Div",
        "",
        vec!["positive_sum".to_string(), "fold_count".to_string()],
        "positive_probability",
        Vec::new(),
    );
    graph.initializer(float_tensor("one", vec![1.0]));
    graph.node(
        "Sub",
        "",
        vec!["one".to_string(), "positive_probability".to_string()],
        "negative_probability",
        Vec::new(),
    );
    graph.node(
        "Concat",
        "",
        vec![
            "negative_probability".to_string(),
            "positive_probability".to_string(),
        ],
        PROBABILITIES_OUTPUT,
        vec![attr_int("axis", 1)],
    );
    // ArgMax picks the first maximum, so an exact tie yields class 0
    graph.node(
        "ArgMax",
        "",
        vec![PROBABILITIES_OUTPUT.to_string()],
        LABEL_OUTPUT,
        vec![attr_int("axis", 1), attr_int("keepdims", 0)],
    );

    graph.output(LABEL_OUTPUT, data_type::INT64, &[None]);
    graph.output(PROBABILITIES_OUTPUT, data_type::FLOAT, &[None, Some(2)]);

    let metadata = &pipeline.metadata;
    let mut metadata_props = vec![
        entry("model_id", &metadata.model_id),
        entry("trained_at", &metadata.trained_at.to_rfc3339()),
        entry("numeric_features", &metadata.numeric_features.join(",")),
        entry("categorical_feature", &metadata.categorical_feature),
        entry("categories", &categories.join(",")),
        entry("calibration_folds", &folds.len().to_string()),
    ];
    if let Some(accuracy) = metadata.test_accuracy {
        metadata_props.push(entry("test_accuracy", &format!("{:.6}", accuracy)));
    }

    Ok(ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![
            OperatorSetIdProto {
                domain: String::new(),
                version: options.target_opset,
            },
            OperatorSetIdProto {
                domain: ML_DOMAIN.to_string(),
                version: options.ml_opset,
            },
        ],
        producer_name: PRODUCER_NAME.to_string(),
        producer_version: NUDGE_VERSION.to_string(),
        domain: String::new(),
        model_version: i64::from(metadata.format_version),
        doc_string: "Calibrated gradient boosting classifier for phone usage interventions"
            .to_string(),
        graph: Some(graph.finish()),
        metadata_props,
    })
}

/// Tree ensemble plus sigmoid for one fold; returns the fold's probability output
fn add_calibrated_fold(graph: &mut GraphBuilder, idx: usize, fold: &CalibratedFold) -> String {
    let raw = format!("fold{}_decision", idx);
    graph.node(
        "TreeEnsembleRegressor",
        ML_DOMAIN,
        vec!["features".to_string()],
        &raw,
        tree_ensemble_attributes(&fold.booster),
    );

    // p = 1 / (1 + exp(a f + b)) = sigmoid(-a f - b)
    let slope = format!("fold{}_slope", idx);
    let offset = format!("fold{}_offset", idx);
    graph.initializer(float_tensor(&slope, vec![-fold.calibrator.a as f32]));
    graph.initializer(float_tensor(&offset, vec![-fold.calibrator.b as f32]));

    let scaled = format!("fold{}_scaled", idx);
    let shifted = format!("fold{}_shifted", idx);
    let probability = format!("fold{}_probability", idx);
    graph.node("Mul", "", vec![raw, slope], &scaled, Vec::new());
    graph.node("Add", "", vec![scaled, offset], &shifted, Vec::new());
    graph.node("Sigmoid", "", vec![shifted], &probability, Vec::new());
    probability
}

/// Flatten a booster into `TreeEnsembleRegressor` attributes
fn tree_ensemble_attributes(booster: &GradientBoostingClassifier) -> Vec<AttributeProto> {
    let mut tree_ids = Vec::new();
    let mut node_ids = Vec::new();
    let mut feature_ids = Vec::new();
    let mut modes = Vec::new();
    let mut thresholds = Vec::new();
    let mut true_ids = Vec::new();
    let mut false_ids = Vec::new();
    let mut missing_tracks_true = Vec::new();

    let mut target_tree_ids = Vec::new();
    let mut target_node_ids = Vec::new();
    let mut target_ids = Vec::new();
    let mut target_weights = Vec::new();

    for (tree_id, tree) in booster.trees.iter().enumerate() {
        for (node_id, node) in tree.nodes.iter().enumerate() {
            tree_ids.push(tree_id as i64);
            node_ids.push(node_id as i64);
            missing_tracks_true.push(0);
            match node.feature {
                Some(feature) => {
                    feature_ids.push(feature as i64);
                    modes.push("BRANCH_LEQ".to_string());
                    thresholds.push(node.threshold as f32);
                    true_ids.push(node.left as i64);
                    false_ids.push(node.right as i64);
                }
                None => {
                    feature_ids.push(0);
                    modes.push("LEAF".to_string());
                    thresholds.push(0.0);
                    true_ids.push(0);
                    false_ids.push(0);

                    target_tree_ids.push(tree_id as i64);
                    target_node_ids.push(node_id as i64);
                    target_ids.push(0);
                    target_weights.push((booster.learning_rate * node.value) as f32);
                }
            }
        }
    }

    vec![
        attr_int("n_targets", 1),
        attr_ints("nodes_treeids", tree_ids),
        attr_ints("nodes_nodeids", node_ids),
        attr_ints("nodes_featureids", feature_ids),
        attr_strings("nodes_modes", &modes),
        attr_floats("nodes_values", thresholds),
        attr_ints("nodes_truenodeids", true_ids),
        attr_ints("nodes_falsenodeids", false_ids),
        attr_ints("nodes_missing_value_tracks_true", missing_tracks_true),
        attr_ints("target_treeids", target_tree_ids),
        attr_ints("target_nodeids", target_node_ids),
        attr_ints("target_ids", target_ids),
        attr_floats("target_weights", target_weights),
        attr_floats("base_values", vec![booster.init_score as f32]),
        attr_string("aggregate_function", "SUM"),
        attr_string("post_transform", "NONE"),
    ]
}

/// Accumulates graph parts in emission order
struct GraphBuilder {
    graph: GraphProto,
}

impl GraphBuilder {
    fn new(name: &str) -> Self {
        Self {
            graph: GraphProto {
                name: name.to_string(),
                ..GraphProto::default()
            },
        }
    }

    fn node(
        &mut self,
        op_type: &str,
        domain: &str,
        inputs: Vec<String>,
        output: &str,
        attribute: Vec<AttributeProto>,
    ) {
        let name = format!("{}_{}", op_type, self.graph.node.len());
        self.graph.node.push(NodeProto {
            input: inputs,
            output: vec![output.to_string()],
            name,
            op_type: op_type.to_string(),
            attribute,
            doc_string: String::new(),
            domain: domain.to_string(),
        });
    }

    fn initializer(&mut self, tensor: TensorProto) {
        self.graph.initializer.push(tensor);
    }

    fn input(&mut self, name: &str, elem_type: i32, dims: &[Option<i64>]) {
        self.graph.input.push(value_info(name, elem_type, dims));
    }

    fn output(&mut self, name: &str, elem_type: i32, dims: &[Option<i64>]) {
        self.graph.output.push(value_info(name, elem_type, dims));
    }

    fn finish(self) -> GraphProto {
        self.graph
    }
}

/// Tensor value info; `None` dims become the symbolic batch dimension
fn value_info(name: &str, elem_type: i32, dims: &[Option<i64>]) -> ValueInfoProto {
    use tensor_shape_proto::dimension::Value as Dim;

    let dim = dims
        .iter()
        .map(|d| tensor_shape_proto::Dimension {
            value: Some(match d {
                Some(size) => Dim::DimValue(*size),
                None => Dim::DimParam("N".to_string()),
            }),
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type,
                shape: Some(TensorShapeProto { dim }),
            })),
        }),
    }
}

fn float_tensor(name: &str, values: Vec<f32>) -> TensorProto {
    TensorProto {
        dims: vec![values.len() as i64],
        data_type: data_type::FLOAT,
        float_data: values,
        name: name.to_string(),
        ..TensorProto::default()
    }
}

fn int64_tensor(name: &str, values: Vec<i64>) -> TensorProto {
    TensorProto {
        dims: vec![values.len() as i64],
        data_type: data_type::INT64,
        int64_data: values,
        name: name.to_string(),
        ..TensorProto::default()
    }
}

fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::INT,
        i: Some(value),
        ..AttributeProto::default()
    }
}

fn attr_ints(name: &str, values: Vec<i64>) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::INTS,
        ints: values,
        ..AttributeProto::default()
    }
}

fn attr_floats(name: &str, values: Vec<f32>) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::FLOATS,
        floats: values,
        ..AttributeProto::default()
    }
}

fn attr_string(name: &str, value: &str) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::STRING,
        s: Some(value.as_bytes().to_vec()),
        ..AttributeProto::default()
    }
}

fn attr_strings(name: &str, values: &[String]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::STRINGS,
        strings: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        ..AttributeProto::default()
    }
}

fn entry(key: &str, value: &str) -> StringStringEntryProto {
    StringStringEntryProto {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::read_csv;
    use crate::export::proto::tensor_shape_proto::dimension::Value as Dim;
    use crate::features::FeatureDeriver;
    use crate::pipeline::train_table;
    use crate::types::FeatureFrame;
    use crate::test_support::{fast_config, synthetic_csv};
    use pretty_assertions::assert_eq;

    fn trained() -> InterventionPipeline {
        let config = fast_config();
        let table = read_csv(synthetic_csv(150).as_bytes(), &config.dataset).unwrap();
        train_table(table, &config).unwrap()
    }

    fn decoded(pipeline: &InterventionPipeline) -> ModelProto {
        let bytes = export_onnx(pipeline, &OnnxOptions::default()).unwrap();
        ModelProto::decode(bytes.as_slice()).unwrap()
    }

    fn tensor_type(info: &ValueInfoProto) -> &type_proto::Tensor {
        match info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
            Some(type_proto::Value::TensorType(t)) => t,
            None => panic!("{} has no tensor type", info.name),
        }
    }

    fn attribute<'a>(node: &'a NodeProto, name: &str) -> &'a AttributeProto {
        node.attribute
            .iter()
            .find(|a| a.name == name)
            .unwrap_or_else(|| panic!("{} has no attribute {}", node.op_type, name))
    }

    #[test]
    fn test_inputs_one_per_feature() {
        let pipeline = trained();
        let model = decoded(&pipeline);
        let graph = model.graph.unwrap();

        let names: Vec<&str> = graph.input.iter().map(|i| i.name.as_str()).collect();
        let mut expected: Vec<&str> = pipeline
            .metadata
            .numeric_features
            .iter()
            .map(String::as_str)
            .collect();
        expected.push("top_app_category");
        assert_eq!(names, expected);

        for info in &graph.input {
            let tensor = tensor_type(info);
            let dims: Vec<_> = tensor
                .shape
                .as_ref()
                .unwrap()
                .dim
                .iter()
                .map(|d| d.value.clone())
                .collect();
            assert_eq!(
                dims,
                vec![Some(Dim::DimParam("N".to_string())), Some(Dim::DimValue(1))]
            );
            let expected_type = if info.name == "top_app_category" {
                data_type::STRING
            } else {
                data_type::FLOAT
            };
            assert_eq!(tensor.elem_type, expected_type, "{}", info.name);
        }
    }

    #[test]
    fn test_outputs_and_opsets() {
        let model = decoded(&trained());
        assert_eq!(model.ir_version, IR_VERSION);
        assert_eq!(model.producer_name, PRODUCER_NAME);

        let opsets: Vec<(&str, i64)> = model
            .opset_import
            .iter()
            .map(|o| (o.domain.as_str(), o.version))
            .collect();
        assert_eq!(opsets, vec![("", 15), (ML_DOMAIN, 1)]);

        let graph = model.graph.unwrap();
        let outputs: Vec<(&str, i32)> = graph
            .output
            .iter()
            .map(|o| (o.name.as_str(), tensor_type(o).elem_type))
            .collect();
        assert_eq!(
            outputs,
            vec![
                (LABEL_OUTPUT, data_type::INT64),
                (PROBABILITIES_OUTPUT, data_type::FLOAT)
            ]
        );
        // probabilities stay a plain tensor
        assert!(graph.node.iter().all(|n| n.op_type != "ZipMap"));
    }

    #[test]
    fn test_one_tree_ensemble_per_fold() {
        let pipeline = trained();
        let graph = decoded(&pipeline).graph.unwrap();

        let ensembles: Vec<&NodeProto> = graph
            .node
            .iter()
            .filter(|n| n.op_type == "TreeEnsembleRegressor")
            .collect();
        assert_eq!(ensembles.len(), pipeline.classifier.folds.len());

        for (node, fold) in ensembles.iter().zip(&pipeline.classifier.folds) {
            assert_eq!(node.domain, ML_DOMAIN);
            let total_nodes: usize = fold.booster.trees.iter().map(|t| t.nodes.len()).sum();
            let total_leaves: usize = fold.booster.trees.iter().map(|t| t.n_leaves()).sum();
            assert_eq!(attribute(node, "nodes_nodeids").ints.len(), total_nodes);
            assert_eq!(attribute(node, "target_weights").floats.len(), total_leaves);
            assert_eq!(
                attribute(node, "base_values").floats,
                vec![fold.booster.init_score as f32]
            );
            assert_eq!(
                attribute(node, "aggregate_function").s.as_deref(),
                Some(b"SUM".as_slice())
            );
        }
    }

    #[test]
    fn test_preprocessing_nodes_carry_fitted_state() {
        let pipeline = trained();
        let graph = decoded(&pipeline).graph.unwrap();

        let scaler = graph.node.iter().find(|n| n.op_type == "Scaler").unwrap();
        assert_eq!(
            attribute(scaler, "offset").floats,
            to_f32(&pipeline.preprocessor.scaler.mean)
        );

        let encoder = graph
            .node
            .iter()
            .find(|n| n.op_type == "OneHotEncoder")
            .unwrap();
        let cats: Vec<String> = attribute(encoder, "cats_strings")
            .strings
            .iter()
            .map(|s| String::from_utf8(s.clone()).unwrap())
            .collect();
        assert_eq!(cats, pipeline.preprocessor.encoder.categories);
        assert_eq!(attribute(encoder, "zeros").i, Some(1));

        let shape = graph
            .initializer
            .iter()
            .find(|t| t.name == "category_shape")
            .unwrap();
        assert_eq!(shape.int64_data, vec![-1, cats.len() as i64]);
    }

    #[test]
    fn test_metadata_props() {
        let pipeline = trained();
        let model = decoded(&pipeline);
        let model_id = model
            .metadata_props
            .iter()
            .find(|p| p.key == "model_id")
            .map(|p| p.value.clone());
        assert_eq!(model_id, Some(pipeline.metadata.model_id.clone()));
        assert!(model.metadata_props.iter().any(|p| p.key == "test_accuracy"));
    }

    #[test]
    fn test_low_opset_rejected() {
        let options = OnnxOptions {
            target_opset: 9,
            ..OnnxOptions::default()
        };
        assert!(matches!(
            export_onnx(&trained(), &options),
            Err(TrainError::ExportError(_))
        ));
    }

    #[test]
    fn test_write_and_read_back() {
        let pipeline = trained();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        write_onnx(&pipeline, &OnnxOptions::default(), &path).unwrap();

        let model = read_onnx(&path).unwrap();
        assert_eq!(model, build_model(&pipeline, &OnnxOptions::default()).unwrap());
    }

    /// Evaluate the decoded graph for one row, node by node, in `f32`.
    ///
    /// Covers exactly the operators the exporter emits; tensors are the
    /// per-row slices, so batch-axis ops (Concat, Reshape) act on one row.
    fn evaluate_row(graph: &GraphProto, numeric: &[f64], category: &str) -> Vec<f32> {
        use std::collections::HashMap;

        let mut values: HashMap<&str, Vec<f32>> = HashMap::new();
        for tensor in &graph.initializer {
            if tensor.data_type == data_type::FLOAT {
                values.insert(&tensor.name, tensor.float_data.clone());
            }
        }
        let (numeric_inputs, category_input) = graph.input.split_at(graph.input.len() - 1);
        for (info, &v) in numeric_inputs.iter().zip(numeric) {
            values.insert(&info.name, vec![v as f32]);
        }
        let category_name = category_input[0].name.as_str();

        for node in &graph.node {
            let arg = |i: usize| &values[node.input[i].as_str()];
            let binary = |f: fn(f32, f32) -> f32| -> Vec<f32> {
                let (a, b) = (arg(0), arg(1));
                let n = a.len().max(b.len());
                (0..n)
                    .map(|i| f(a[i % a.len()], b[i % b.len()]))
                    .collect()
            };
            let out: Vec<f32> = match node.op_type.as_str() {
                "Concat" => node.input.iter().flat_map(|n| values[n.as_str()].clone()).collect(),
                "Scaler" => {
                    let offset = &attribute(node, "offset").floats;
                    let scale = &attribute(node, "scale").floats;
                    arg(0)
                        .iter()
                        .zip(offset.iter().zip(scale))
                        .map(|(x, (o, s))| (x - o) * s)
                        .collect()
                }
                "OneHotEncoder" => {
                    assert_eq!(node.input[0], category_name);
                    attribute(node, "cats_strings")
                        .strings
                        .iter()
                        .map(|c| if c.as_slice() == category.as_bytes() { 1.0 } else { 0.0 })
                        .collect()
                }
                "Reshape" => arg(0).clone(),
                "TreeEnsembleRegressor" => vec![evaluate_ensemble(node, arg(0))],
                "Mul" => binary(|a, b| a * b),
                "Add" => binary(|a, b| a + b),
                "Sub" => binary(|a, b| a - b),
                "Div" => binary(|a, b| a / b),
                "Sigmoid" => arg(0).iter().map(|z| 1.0 / (1.0 + (-z).exp())).collect(),
                "Sum" => {
                    let mut total = 0.0f32;
                    for name in &node.input {
                        total += values[name.as_str()][0];
                    }
                    vec![total]
                }
                "ArgMax" => {
                    let v = arg(0);
                    let best = (1..v.len()).fold(0, |best, i| if v[i] > v[best] { i } else { best });
                    vec![best as f32]
                }
                other => panic!("unexpected operator {}", other),
            };
            values.insert(&node.output[0], out);
        }

        values[PROBABILITIES_OUTPUT].clone()
    }

    /// `TreeEnsembleRegressor` with SUM aggregation and BRANCH_LEQ nodes
    fn evaluate_ensemble(node: &NodeProto, features: &[f32]) -> f32 {
        use std::collections::HashMap;

        let tree_ids = &attribute(node, "nodes_treeids").ints;
        let node_ids = &attribute(node, "nodes_nodeids").ints;
        let feature_ids = &attribute(node, "nodes_featureids").ints;
        let modes = &attribute(node, "nodes_modes").strings;
        let thresholds = &attribute(node, "nodes_values").floats;
        let true_ids = &attribute(node, "nodes_truenodeids").ints;
        let false_ids = &attribute(node, "nodes_falsenodeids").ints;

        let index: HashMap<(i64, i64), usize> = tree_ids
            .iter()
            .zip(node_ids)
            .enumerate()
            .map(|(i, (&t, &n))| ((t, n), i))
            .collect();
        let mut weights: HashMap<(i64, i64), f32> = HashMap::new();
        let target_trees = &attribute(node, "target_treeids").ints;
        let target_nodes = &attribute(node, "target_nodeids").ints;
        let target_weights = &attribute(node, "target_weights").floats;
        for ((&t, &n), &w) in target_trees.iter().zip(target_nodes).zip(target_weights) {
            *weights.entry((t, n)).or_default() += w;
        }

        let mut roots: Vec<i64> = tree_ids.clone();
        roots.dedup();
        let mut total = attribute(node, "base_values").floats[0];
        for tree in roots {
            let mut current = index[&(tree, 0)];
            while modes[current].as_slice() == b"BRANCH_LEQ" {
                let x = features[feature_ids[current] as usize];
                let next = if x <= thresholds[current] {
                    true_ids[current]
                } else {
                    false_ids[current]
                };
                current = index[&(tree, next)];
            }
            assert_eq!(modes[current].as_slice(), b"LEAF");
            total += weights[&(tree, node_ids[current])];
        }
        total
    }

    fn training_frame() -> FeatureFrame {
        let config = fast_config();
        let mut table = read_csv(synthetic_csv(150).as_bytes(), &config.dataset).unwrap();
        FeatureDeriver::derive(&mut table, &config.dataset, &config.features).unwrap();
        FeatureFrame::from_table(&table, &config.dataset).unwrap().0
    }

    fn assert_graph_matches_native(
        pipeline: &InterventionPipeline,
        graph: &GraphProto,
        frame: &FeatureFrame,
    ) {
        let native = pipeline.predict_proba(frame).unwrap();
        for (row, expected) in native.iter().enumerate() {
            let got = evaluate_row(graph, &frame.numeric[row], &frame.categories[row]);
            assert_eq!(got.len(), 2);
            for class in 0..2 {
                let diff = (f64::from(got[class]) - expected[class]).abs();
                assert!(
                    diff < 1e-5,
                    "row {} class {}: graph {} native {}",
                    row,
                    class,
                    got[class],
                    expected[class]
                );
            }
        }
    }

    #[test]
    fn test_graph_probabilities_match_native() {
        let pipeline = trained();
        let graph = decoded(&pipeline).graph.unwrap();
        assert_graph_matches_native(&pipeline, &graph, &training_frame());
    }

    #[test]
    fn test_graph_unknown_category_matches_native() {
        let pipeline = trained();
        let graph = decoded(&pipeline).graph.unwrap();
        let mut frame = training_frame();
        frame.categories = vec!["category-not-in-training".to_string(); frame.n_rows()];
        assert_graph_matches_native(&pipeline, &graph, &frame);
    }

    #[test]
    fn test_graph_calibration_and_scale_constants() {
        let pipeline = trained();
        let graph = decoded(&pipeline).graph.unwrap();
        let initializer = |name: &str| {
            graph
                .initializer
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.float_data.clone())
                .unwrap()
        };

        for (idx, fold) in pipeline.classifier.folds.iter().enumerate() {
            assert_eq!(
                initializer(&format!("fold{}_slope", idx)),
                vec![-fold.calibrator.a as f32]
            );
            assert_eq!(
                initializer(&format!("fold{}_offset", idx)),
                vec![-fold.calibrator.b as f32]
            );
        }

        let scaler = graph.node.iter().find(|n| n.op_type == "Scaler").unwrap();
        let expected: Vec<f32> = pipeline
            .preprocessor
            .scaler
            .scale
            .iter()
            .map(|s| (1.0 / s) as f32)
            .collect();
        assert_eq!(attribute(scaler, "scale").floats, expected);

        let ensemble = graph
            .node
            .iter()
            .find(|n| n.op_type == "TreeEnsembleRegressor")
            .unwrap();
        let booster = &pipeline.classifier.folds[0].booster;
        let first_leaf = booster.trees[0].nodes.iter().find(|n| n.is_leaf()).unwrap();
        assert_eq!(
            attribute(ensemble, "target_weights").floats[0],
            (booster.learning_rate * first_leaf.value) as f32
        );
    }
}
