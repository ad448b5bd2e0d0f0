use std::{fs, io::Write, path::Path};

use log::{info, warn};
use rand::Rng;
use tempfile::NamedTempFile;

use crate::{
    FewShotErr, Result,
    error::Context,
    model::{Model, ModelSpec},
};

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

impl Model {
    /// Serializes the model.
    ///
    /// The format is a big endian `u32` with the length of a json `ModelSpec` header, the header
    /// itself and every parameter as raw `f32` bytes, in `learner | mixer | classifier` order.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self).context("serialize model")
    }

    /// Rebuilds a model serialized with `serialize`.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes).context("deserialize model")
    }
}

fn serialize(model: &Model) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(&model.spec())?;
    let len = LenType::try_from(header.len())
        .map_err(|_| FewShotErr::Serialization("header too long".into()))?;
    let params: &[u8] = bytemuck::cast_slice(model.parameters());

    let mut buf = Vec::with_capacity(LEN_TYPE_SIZE + header.len() + params.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(params);
    Ok(buf)
}

fn deserialize(bytes: &[u8]) -> Result<Model> {
    let Some((len, rest)) = bytes.split_first_chunk::<LEN_TYPE_SIZE>() else {
        return Err(FewShotErr::Serialization("missing header length".into()));
    };

    let len = LenType::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return Err(FewShotErr::Serialization("truncated header".into()));
    }

    let (header, rest) = rest.split_at(len);
    let spec: ModelSpec = serde_json::from_slice(header)?;

    if rest.len() % size_of::<f32>() != 0 {
        return Err(FewShotErr::Serialization(format!(
            "{} parameter bytes is not a whole amount of f32",
            rest.len()
        )));
    }

    let mut params = vec![0f32; rest.len() / size_of::<f32>()];
    bytemuck::cast_slice_mut::<f32, u8>(&mut params).copy_from_slice(rest);

    Model::from_parts(spec, params).map_err(|e| FewShotErr::Serialization(e.to_string()))
}

/// Saves the model at `path`.
///
/// The model is written to a temporary file next to `path` which then replaces it, so `path`
/// either keeps its previous contents or holds the whole new model.
pub fn save(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    save_inner(model, path.as_ref()).context("save model")
}

fn save_inner(model: &Model, path: &Path) -> Result<()> {
    let bytes = model.serialize()?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| FewShotErr::io(dir, e))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| FewShotErr::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| FewShotErr::io(path, e.error))?;

    Ok(())
}

/// Loads a model saved with `save`.
pub fn load(path: impl AsRef<Path>) -> Result<Model> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| FewShotErr::io(path, e))
        .context("load model")?;
    Model::deserialize(&bytes)
}

/// Loads the model at `path`, or creates a new one if it is missing or unreadable.
///
/// # Arguments
/// * `path` - Where the model was saved.
/// * `spec` - The architecture of the new model.
/// * `rng` - The source of the new model's initial parameters.
pub fn load_or_create<R: Rng>(
    path: impl AsRef<Path>,
    spec: ModelSpec,
    rng: &mut R,
) -> Result<Model> {
    let path = path.as_ref();

    match load(path) {
        Ok(model) => {
            let loaded = model.spec();
            info!(
                image_size = loaded.image_size,
                knowledge_size = loaded.knowledge_size;
                "loaded model from {}", path.display()
            );
            if loaded != spec {
                warn!("loaded spec {loaded:?} differs from {spec:?}, keeping it");
            }
            Ok(model)
        }
        Err(e) => {
            warn!("couldn't load model: {e}");
            info!("creating new model");
            Model::new(spec, rng)
        }
    }
}
