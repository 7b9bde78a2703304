#![cfg(feature = "serialization")] // Only compile this test module if "serialization" is enabled

use eager_grad::{ops, Error, Tensor, TensorSnapshot};

fn check_tensor_equality(t1: &Tensor<f64>, t2: &Tensor<f64>) {
    assert_eq!(t1.shape(), t2.shape(), "Shapes differ");
    assert_eq!(t1.batch_count(), t2.batch_count(), "Batch counts differ");
    assert_eq!(t1.name(), t2.name(), "Names differ");
    assert_eq!(t1.to_vec(), t2.to_vec(), "Data differs");
}

#[test]
fn test_tensor_json_round_trip() -> Result<(), Error> {
    let original = Tensor::<f64>::new(vec![1.0, 2.0, 3.0, 4.0], &[2], 2)?.with_name("weights");
    original.set_grad(vec![0.1, 0.2, 0.3, 0.4])?;

    let serialized = original.to_json()?;
    let restored = Tensor::<f64>::from_json(&serialized)?;

    check_tensor_equality(&original, &restored);
    assert_ne!(original.id(), restored.id());
    // Gradients are not part of a snapshot
    assert_eq!(restored.grad_to_vec(), vec![0.0; 4]);
    Ok(())
}

#[test]
fn test_snapshot_drops_graph() -> Result<(), Error> {
    let x = Tensor::<f64>::from_vec(vec![0.5], &[1])?;
    let y = ops::sin(&x)?;
    let restored = Tensor::<f64>::from_snapshot(y.snapshot())?;
    assert!(restored.is_leaf());
    assert_eq!(restored.to_vec(), y.to_vec());
    Ok(())
}

#[test]
fn test_snapshot_format() -> Result<(), Error> {
    let t = Tensor::<f32>::from_vec(vec![1.5, -2.0], &[2])?.with_name("b");
    let value: serde_json::Value = serde_json::from_str(&t.to_json()?)
        .map_err(|e| Error::InternalLogicError(format!("Failed to parse JSON: {}", e)))?;
    assert_eq!(value["name"], "b");
    assert_eq!(value["shape"], serde_json::json!([2]));
    assert_eq!(value["batch_count"], 1);
    assert_eq!(value["data"], serde_json::json!([1.5, -2.0]));
    Ok(())
}

#[test]
fn test_invalid_snapshot_is_rejected() {
    let snapshot = TensorSnapshot {
        name: "broken".to_string(),
        shape: vec![3],
        batch_count: 1,
        data: vec![1.0, 2.0],
    };
    assert!(matches!(
        Tensor::<f64>::from_snapshot(snapshot),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Tensor::<f64>::from_json("{not json"),
        Err(Error::SerializationError(_))
    ));
}
