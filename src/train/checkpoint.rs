//! Safetensors checkpoints of the model parameters.
//!
//! Each checkpoint is a single file `model-step-<step>.safetensors` holding
//! the twelve parameter tensors under their stable names, with the step
//! recorded in the metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{Error, Result};
use crate::model::DayTypeNet;

/// File name for a checkpoint tagged with `step`.
pub fn checkpoint_file_name(step: usize) -> String {
    format!("model-step-{step}.safetensors")
}

/// Serialize every model parameter to `dir/model-step-<step>.safetensors`.
///
/// Creates `dir` if needed. Refuses to overwrite an existing file so a rerun
/// cannot silently clobber an earlier training run.
pub fn save_checkpoint(net: &DayTypeNet, dir: &Path, step: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(checkpoint_file_name(step));
    if path.exists() {
        return Err(Error::CheckpointIo(format!(
            "checkpoint already exists: {}",
            path.display()
        )));
    }

    let views = net.views();
    let byte_views: Vec<(&str, TensorView<'_>)> = views
        .iter()
        .map(|p| {
            let bytes: &[u8] = bytemuck::cast_slice(p.data);
            let view = TensorView::new(Dtype::F32, p.shape.to_vec(), bytes)
                .map_err(|e| Error::Serialization(format!("tensor {}: {e}", p.name)))?;
            Ok((p.name, view))
        })
        .collect::<Result<_>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("step".to_string(), step.to_string());
    metadata.insert("format".to_string(), "day-type-classifier-v1".to_string());

    let data = safetensors::serialize(byte_views, Some(metadata))
        .map_err(|e| Error::Serialization(e.to_string()))?;
    std::fs::write(&path, data)?;
    Ok(path)
}

/// Load a checkpoint file back into a freshly allocated model.
///
/// Every expected tensor must be present with dtype F32 and the exact shape
/// of the corresponding parameter.
pub fn restore_checkpoint(path: &Path) -> Result<DayTypeNet> {
    let data = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&data)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))?;

    let mut net = DayTypeNet::zeros();
    for slot in net.slots_mut() {
        let view = tensors.tensor(slot.name).map_err(|e| {
            Error::DataFormat(format!("missing tensor '{}' in {}: {e}", slot.name, path.display()))
        })?;
        if view.dtype() != Dtype::F32 {
            return Err(Error::DataFormat(format!(
                "tensor '{}' has dtype {:?}, expected F32",
                slot.name,
                view.dtype()
            )));
        }
        if view.shape() != slot.shape.as_slice() {
            return Err(Error::DataFormat(format!(
                "tensor '{}' has shape {:?}, expected {:?}",
                slot.name,
                view.shape(),
                slot.shape
            )));
        }
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        slot.value.copy_from_slice(&values);
    }
    Ok(net)
}
