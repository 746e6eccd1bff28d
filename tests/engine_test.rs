#![cfg(feature = "tensorrt")]

//! End-to-end engine tests. These need a CUDA device, the TensorRT provider
//! libraries, and a real model artifact, so they are ignored by default; set
//! `TRACKRT_TEST_MODEL` to the artifact path and run with `--ignored`.

use ndarray::Array3;

use trackrt_rs::{InferError, LoadError, TrtDetector};

fn test_model_path() -> String {
    std::env::var("TRACKRT_TEST_MODEL").expect("set TRACKRT_TEST_MODEL")
}

fn synthetic_frame(height: usize, width: usize) -> Array3<u8> {
    Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
        ((y * 3 + x * 5 + c * 7) % 256) as u8
    })
}

#[test]
#[ignore = "requires CUDA device, TensorRT provider libs, and a model artifact"]
fn test_infer_returns_recorded_shapes_in_fixed_order() {
    let detector = TrtDetector::load(test_model_path()).expect("engine should load");
    let shapes = detector.output_shapes().clone();

    // Callers may pass any source resolution; the engine resizes internally.
    let (first, second) = detector.infer(synthetic_frame(480, 640)).unwrap();

    // Second output binding comes first, then the first.
    assert_eq!(first.shape(), shapes[1].as_slice());
    assert_eq!(second.shape(), shapes[0].as_slice());

    detector.close().unwrap();
}

#[test]
#[ignore = "requires CUDA device, TensorRT provider libs, and a model artifact"]
fn test_repeated_inference_is_deterministic() {
    let detector = TrtDetector::load(test_model_path()).expect("engine should load");
    let frame = synthetic_frame(360, 480);

    let (a1, b1) = detector.infer(frame.clone()).unwrap();
    let (a2, b2) = detector.infer(frame).unwrap();
    assert_eq!(a1, a2);
    assert_eq!(b1, b2);

    detector.close().unwrap();
}

#[test]
#[ignore = "requires CUDA device and TensorRT provider libs"]
fn test_load_rejects_missing_artifact() {
    let result = TrtDetector::load("/nonexistent/model.onnx");
    assert!(matches!(result, Err(LoadError::Artifact { .. })));
}

#[test]
#[ignore = "requires CUDA device, TensorRT provider libs, and a model artifact"]
fn test_infer_rejects_malformed_images() {
    let detector = TrtDetector::load(test_model_path()).expect("engine should load");

    // Wrong channel count.
    let gray = Array3::<u8>::zeros((32, 32, 1));
    assert!(matches!(
        detector.infer(gray),
        Err(InferError::ImageShape { .. })
    ));

    // Empty frame.
    let empty = Array3::<u8>::zeros((0, 16, 3));
    assert!(matches!(
        detector.infer(empty),
        Err(InferError::ImageShape { .. })
    ));

    detector.close().unwrap();
}
