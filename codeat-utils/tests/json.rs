use codeat_utils::{compress_obj, decompress_obj, dejsonify, jsonify, jsonify_internal};
use serde_json::{json, Value};
use std::collections::HashMap;

#[test]
fn test_jsonify_sorts_keys() {
    let value = json!({"b": 1, "a": {"d": [1, 2], "c": null}});
    assert_eq!(
        jsonify(&value).unwrap(),
        r#"{"a":{"c":null,"d":[1,2]},"b":1}"#
    );
}

#[test]
fn test_jsonify_internal_sorts_objects_inside_arrays() {
    let value = json!([{"z": 0, "y": 1}]);
    assert_eq!(
        jsonify_internal(&value).to_string(),
        r#"[{"y":1,"z":0}]"#
    );
}

#[test]
fn test_compress_obj() {
    let mut codes = HashMap::new();
    codes.insert("spk1".to_string(), vec![0.5f32, -1.25]);
    codes.insert("spk2".to_string(), vec![2.0f32, 0.0]);

    let compressed = compress_obj(&codes).unwrap();
    assert_ne!(compressed, jsonify(&codes).unwrap().into_bytes());
    let decompressed: HashMap<String, Vec<f32>> = decompress_obj(&compressed).unwrap();
    assert_eq!(decompressed, codes);
}

#[test]
fn test_dejsonify_rejects_garbage() {
    assert!(dejsonify::<Value>("{not json").is_err());
}
