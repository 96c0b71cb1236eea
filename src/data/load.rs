//! SafeTensors dataset loader.
//!
//! A dataset container is a SafeTensors file holding three named f32
//! tensors: `datas` (flow tensor), `others` (auxiliary features), and
//! `labels` (one-hot labels). The loader validates the fixed schema and
//! never writes the source.

use std::path::Path;

use ndarray::{Array2, Array4};
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;

use super::FlowDataset;
use crate::{Error, Result};

/// Load one dataset container from `path`.
///
/// # Errors
///
/// `Error::DataFormat` when a tensor is missing, not f32, or does not match
/// the fixed schema; `Error::Serialization` when the file is not a valid
/// SafeTensors container.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<FlowDataset> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        Error::DataFormat(format!("failed to read {}: {e}", path.display()))
    })?;
    let st = SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

    let (flow_shape, flow_data) = tensor_f32(&st, "datas")?;
    let (aux_shape, aux_data) = tensor_f32(&st, "others")?;
    let (label_shape, label_data) = tensor_f32(&st, "labels")?;

    let flows = array4("datas", &flow_shape, flow_data)?;
    let aux = array2("others", &aux_shape, aux_data)?;
    let labels = array2("labels", &label_shape, label_data)?;

    FlowDataset::new(flows, aux, labels)
}

/// Load the raw and augmented containers, confirming each on stdout.
///
/// Both are validated against the same schema. The augmented set enriches
/// storage only; the training loop samples from the raw-derived train split.
pub fn load_raw_and_augmented(
    raw_path: impl AsRef<Path>,
    augmented_path: impl AsRef<Path>,
) -> Result<(FlowDataset, FlowDataset)> {
    let raw = load_dataset(raw_path)?;
    println!("read raw data ok ({} samples)", raw.len());
    let augmented = load_dataset(augmented_path)?;
    println!("read augmented data ok ({} samples)", augmented.len());
    Ok((raw, augmented))
}

/// Extract a named f32 tensor as `(shape, data)`.
fn tensor_f32(st: &SafeTensors<'_>, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
    let view = st
        .tensor(name)
        .map_err(|e| Error::DataFormat(format!("missing tensor `{name}`: {e}")))?;
    if view.dtype() != Dtype::F32 {
        return Err(Error::DataFormat(format!(
            "tensor `{name}` has dtype {:?}, expected F32",
            view.dtype()
        )));
    }
    let expected = view.shape().iter().product::<usize>() * std::mem::size_of::<f32>();
    if view.data().len() != expected {
        return Err(Error::DataFormat(format!(
            "tensor `{name}` holds {} bytes, expected {expected}",
            view.data().len()
        )));
    }
    // pod_collect_to_vec copies, so the file buffer's alignment is irrelevant.
    Ok((view.shape().to_vec(), bytemuck::pod_collect_to_vec(view.data())))
}

fn array4(name: &str, shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    let &[n, h, w, c] = shape else {
        return Err(Error::DataFormat(format!(
            "tensor `{name}` has rank {}, expected 4",
            shape.len()
        )));
    };
    Array4::from_shape_vec((n, h, w, c), data)
        .map_err(|e| Error::DataFormat(format!("tensor `{name}`: {e}")))
}

fn array2(name: &str, shape: &[usize], data: Vec<f32>) -> Result<Array2<f32>> {
    let &[n, d] = shape else {
        return Err(Error::DataFormat(format!(
            "tensor `{name}` has rank {}, expected 2",
            shape.len()
        )));
    };
    Array2::from_shape_vec((n, d), data)
        .map_err(|e| Error::DataFormat(format!("tensor `{name}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{test_support, AUX_DIM, FLOW_CHANNELS, GRID_SIZE, NUM_CLASSES};
    use safetensors::tensor::TensorView;
    use std::collections::HashMap;

    fn view_f32(shape: Vec<usize>, bytes: &[u8]) -> TensorView<'_> {
        TensorView::new(Dtype::F32, shape, bytes).expect("valid tensor view")
    }

    fn write_container(
        path: &std::path::Path,
        datas: (&[usize], &[f32]),
        others: (&[usize], &[f32]),
        labels: (&[usize], &[f32]),
    ) {
        let d_bytes: Vec<u8> = bytemuck::cast_slice(datas.1).to_vec();
        let o_bytes: Vec<u8> = bytemuck::cast_slice(others.1).to_vec();
        let l_bytes: Vec<u8> = bytemuck::cast_slice(labels.1).to_vec();
        let views = vec![
            ("datas", view_f32(datas.0.to_vec(), &d_bytes)),
            ("others", view_f32(others.0.to_vec(), &o_bytes)),
            ("labels", view_f32(labels.0.to_vec(), &l_bytes)),
        ];
        let bytes = safetensors::serialize(views, Some(HashMap::new()))
            .expect("serialization of valid views succeeds");
        std::fs::write(path, bytes).expect("tempfile is writable");
    }

    #[test]
    fn test_load_roundtrip() {
        let ds = test_support::synthetic_dataset(4);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.safetensors");
        write_container(
            &path,
            (&[4, GRID_SIZE, GRID_SIZE, FLOW_CHANNELS], ds.flows().as_slice().unwrap()),
            (&[4, AUX_DIM], ds.aux().as_slice().unwrap()),
            (&[4, NUM_CLASSES], ds.labels().as_slice().unwrap()),
        );

        let loaded = load_dataset(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.flows(), ds.flows());
        assert_eq!(loaded.aux(), ds.aux());
        assert_eq!(loaded.labels(), ds.labels());
    }

    #[test]
    fn test_missing_tensor_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.safetensors");
        let data = vec![0.0f32; GRID_SIZE * GRID_SIZE * FLOW_CHANNELS];
        let bytes_f32: Vec<u8> = bytemuck::cast_slice(&data).to_vec();
        let views = vec![(
            "datas",
            view_f32(vec![1, GRID_SIZE, GRID_SIZE, FLOW_CHANNELS], &bytes_f32),
        )];
        let bytes = safetensors::serialize(views, None).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let err = load_dataset(&path).unwrap_err();
        assert!(err.to_string().contains("others"), "unexpected error: {err}");
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("badshape.safetensors");
        let n = 2;
        let flows = vec![0.0f32; n * 16 * 16 * FLOW_CHANNELS];
        let others = vec![0.0f32; n * AUX_DIM];
        let labels = vec![1.0f32, 0.0, 0.0, 1.0];
        write_container(
            &path,
            (&[n, 16, 16, FLOW_CHANNELS], &flows),
            (&[n, AUX_DIM], &others),
            (&[n, NUM_CLASSES], &labels),
        );
        assert!(matches!(load_dataset(&path), Err(Error::DataFormat(_))));
    }

    #[test]
    fn test_wrong_dtype_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baddtype.safetensors");
        let flows_f64 = vec![0.0f64; GRID_SIZE * GRID_SIZE * FLOW_CHANNELS];
        let others = vec![0.0f32; AUX_DIM];
        let labels = vec![1.0f32, 0.0];
        let f_bytes: Vec<u8> = bytemuck::cast_slice(&flows_f64).to_vec();
        let o_bytes: Vec<u8> = bytemuck::cast_slice(&others).to_vec();
        let l_bytes: Vec<u8> = bytemuck::cast_slice(&labels).to_vec();
        let views = vec![
            (
                "datas",
                TensorView::new(
                    Dtype::F64,
                    vec![1, GRID_SIZE, GRID_SIZE, FLOW_CHANNELS],
                    &f_bytes,
                )
                .unwrap(),
            ),
            ("others", view_f32(vec![1, AUX_DIM], &o_bytes)),
            ("labels", view_f32(vec![1, NUM_CLASSES], &l_bytes)),
        ];
        let bytes = safetensors::serialize(views, None).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let err = load_dataset(&path).unwrap_err();
        assert!(err.to_string().contains("dtype"), "unexpected error: {err}");
    }

    #[test]
    fn test_unreadable_file_rejected() {
        let err = load_dataset("/nonexistent/raw.safetensors").unwrap_err();
        assert!(matches!(err, Error::DataFormat(_)));
    }
}
