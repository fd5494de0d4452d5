use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::model::StyleTtsError;
use super::style::StyleVector;

/// Voices shipped with the service, as `(id, file name)` under the
/// reference-audio directory.
pub const DEFAULT_VOICES: [(&str, &str); 3] = [
    ("3", "3.wav"),
    ("amused", "amused.wav"),
    ("sleepy", "sleepy.wav"),
];

/// Catalogue of reference voices and a cache of their computed styles.
///
/// The catalogue is fixed at construction. Styles are computed on first use
/// (or preloaded from an `.npz` archive) and reused afterwards.
pub struct VoiceStore {
    catalogue: BTreeMap<String, PathBuf>,
    styles: RwLock<HashMap<String, StyleVector>>,
}

impl VoiceStore {
    pub fn new(catalogue: BTreeMap<String, PathBuf>) -> Self {
        Self {
            catalogue,
            styles: RwLock::new(HashMap::new()),
        }
    }

    /// The built-in voices, resolved under `reference_dir`.
    pub fn default_catalogue(reference_dir: &Path) -> Self {
        Self::new(
            DEFAULT_VOICES
                .iter()
                .map(|(id, file)| (id.to_string(), reference_dir.join(file)))
                .collect(),
        )
    }

    /// Read a JSON object mapping voice ids to WAV paths. Relative paths are
    /// resolved against the file's directory.
    pub fn from_json_file(path: &Path) -> Result<Self, StyleTtsError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StyleTtsError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let entries: BTreeMap<String, PathBuf> = serde_json::from_str(&content).map_err(|e| {
            StyleTtsError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        if entries.is_empty() {
            return Err(StyleTtsError::Config(format!(
                "{} defines no voices",
                path.display()
            )));
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let catalogue = entries
            .into_iter()
            .map(|(id, file)| {
                let file = if file.is_relative() { base.join(file) } else { file };
                (id, file)
            })
            .collect();
        Ok(Self::new(catalogue))
    }

    pub fn contains(&self, voice: &str) -> bool {
        self.catalogue.contains_key(voice)
    }

    pub fn reference_path(&self, voice: &str) -> Result<&Path, StyleTtsError> {
        self.catalogue
            .get(voice)
            .map(PathBuf::as_path)
            .ok_or_else(|| StyleTtsError::VoiceNotFound(voice.to_string()))
    }

    /// Voice ids in sorted order.
    pub fn list_voices(&self) -> Vec<&str> {
        self.catalogue.keys().map(String::as_str).collect()
    }

    /// Cached style of `voice`, computing it with `extract` on a miss.
    pub fn style_for<F>(&self, voice: &str, extract: F) -> Result<StyleVector, StyleTtsError>
    where
        F: FnOnce(&Path) -> Result<StyleVector, StyleTtsError>,
    {
        if let Some(style) = self.styles.read().get(voice) {
            return Ok(style.clone());
        }
        let path = self.reference_path(voice)?;
        let style = extract(path)?;
        log::info!("Computed style for voice '{voice}' from {}", path.display());
        self.styles.write().insert(voice.to_string(), style.clone());
        Ok(style)
    }

    pub fn is_cached(&self, voice: &str) -> bool {
        self.styles.read().contains_key(voice)
    }

    /// Seed the cache from an `.npz` archive holding one `<voice>.npy` entry
    /// per catalogued voice. Each entry is a float32 array whose first row is
    /// the `2 * style_dim` style vector. Unknown voices are skipped.
    ///
    /// Returns the number of styles loaded.
    pub fn preload_npz(&self, path: &Path, style_dim: usize) -> Result<usize, StyleTtsError> {
        let file = File::open(path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| StyleTtsError::VoiceParse(format!("Failed to open zip archive: {e}")))?;

        let width = 2 * style_dim;
        let mut loaded = 0;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| {
                StyleTtsError::VoiceParse(format!("Failed to read zip entry {i}: {e}"))
            })?;

            let raw_name = entry.name().to_string();
            let voice = raw_name.trim_end_matches(".npy");
            if raw_name.ends_with('/') || voice.is_empty() {
                continue;
            }
            if !self.contains(voice) {
                log::warn!("Skipping style for unknown voice '{voice}'");
                continue;
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| StyleTtsError::VoiceParse(format!("Failed to read {raw_name}: {e}")))?;

            let rows = parse_npy(&data, &raw_name, width)?;
            let Some(first) = rows.into_iter().next() else {
                return Err(StyleTtsError::VoiceParse(format!("{raw_name}: no style rows")));
            };
            let style = StyleVector::from_concatenated(first)
                .map_err(|e| StyleTtsError::VoiceParse(format!("{raw_name}: {e}")))?;
            self.styles.write().insert(voice.to_string(), style);
            loaded += 1;
        }

        log::info!("Preloaded {loaded} voice styles from {}", path.display());
        Ok(loaded)
    }
}

/// Parse a little-endian float32 `.npy` payload into rows of `width` values.
fn parse_npy(data: &[u8], name: &str, width: usize) -> Result<Vec<Vec<f32>>, StyleTtsError> {
    if data.len() < 10 {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }
    if &data[0..6] != b"\x93NUMPY" {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // header_len at [8..10], little-endian u16 (format version 1.0)
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let data_offset = 10 + header_len;
    if data.len() < data_offset {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }
    let header = String::from_utf8_lossy(&data[10..data_offset]);
    if !header.contains("'<f4'") {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: expected little-endian float32 data"
        )));
    }

    let float_data = &data[data_offset..];
    if float_data.len() % 4 != 0 {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: float data length {} is not a multiple of 4",
            float_data.len()
        )));
    }
    let n_floats = float_data.len() / 4;
    if width == 0 || n_floats % width != 0 {
        return Err(StyleTtsError::VoiceParse(format!(
            "{name}: float count {n_floats} is not a multiple of {width} (style vector dim)"
        )));
    }

    let values: Vec<f32> = float_data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(values.chunks(width).map(<[f32]>::to_vec).collect())
}
