use std::path::Path;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

pub const FILTERS_FILE: &str = "video_filters.tab";
pub const MODIFIERS_FILE: &str = "video_commands.tab";

/// Placeholder replaced by the modifier value
const VALUE_PLACEHOLDER: &str = "#1";
/// Marks a modifier whose code belongs in the `-vf` chain
const FILTER_PREFIX: &str = "vf:";

const DEFAULT_FILTERS: &str = "short_name\tlong_name\tpriority\tcode
quart\tquarter size\t10\tscale=iw/4:-1
half\thalve size\t10\tscale=iw/2:-1
thrqts\t3/4 size\t10\tscale=iw*0.75:-1
eighth\t1/8 size\t10\tscale=iw*0.125:-1
denoise\tdenoise default\t-1\thqdn3d=3:3:2:2
denoise_sft\tdenoise soft\t-1\thqdn3d=3:3:2:2
denoise_vsft\tdenoise very soft\t-1\thqdn3d=2:2:1:1
atadenoise\tadaptive temporal averaging denoiser\t-1\tatadenoise
bm3d\tblock-matching 3d denoiser\t-1\tbm3d
nlm\tnon-local means denoiser\t-1\tnlmeans
deshake\tdeshake\t0\tdeshake,crop=in_w-32:in_h-32:16:16
rot+90\trotate +90 degrees\t1\ttranspose=1
rot-90\trotate -90 degrees\t1\ttranspose=2
rot180\trotate 180 degrees\t1\ttranspose=2,transpose=2
sab\tshape adaptive blur\t-2\tsab
w3fdif\tdeinterlace w3fdif\t-10\tw3fdif
sharp\tsharpen\t5\tsmartblur=lr=2.00:ls=-0.90:lt=-5.0:cr=0.5:cs=1.0:ct=1.5
";

const DEFAULT_MODIFIERS: &str = "short_name\tlong_name\tcode
ss\tstart (secs)\t-ss #1
t\tduration (secs)\t-t #1
crop\tcrop frame (pixels)\tvf:crop=in_w-2*#1:in_h-2*#1:#1:#1
";

/// A named ffmpeg video filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFilter {
    pub short_name: String,
    pub long_name: String,
    /// Lower priorities run earlier in the filter chain
    pub priority: i8,
    pub code: String,
}

/// A parameterised ffmpeg argument or filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoModifier {
    pub short_name: String,
    pub long_name: String,
    pub code: String,
}

/// Where a modifier lands once its value is substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifierCode {
    Filter(String),
    Args(Vec<String>),
}

impl VideoModifier {
    /// Substitute `value` and split argument codes with shell quoting rules
    pub fn expand(&self, value: &str) -> Result<ModifierCode, EngineError> {
        let code = self.code.replace(VALUE_PLACEHOLDER, value);
        match code.strip_prefix(FILTER_PREFIX) {
            Some(filter) => Ok(ModifierCode::Filter(filter.to_string())),
            None => shlex::split(&code).map(ModifierCode::Args).ok_or_else(|| {
                EngineError::Failed(format!("Failed to parse modifier code for {}: {}", self.short_name, code))
            }),
        }
    }
}

/// Filters and modifiers available to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub filters: Vec<VideoFilter>,
    pub modifiers: Vec<VideoModifier>,
}

impl Catalog {
    /// The built-in tables, without touching the filesystem
    pub fn builtin() -> Self {
        // The embedded tables are well formed
        Catalog {
            filters: parse_filters(DEFAULT_FILTERS, Path::new(FILTERS_FILE)).unwrap_or_default(),
            modifiers: parse_modifiers(DEFAULT_MODIFIERS, Path::new(MODIFIERS_FILE)).unwrap_or_default(),
        }
    }

    /// Seed missing tables in `dir`, then read both
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        ensure_catalog(dir)?;
        Ok(Catalog {
            filters: load_filters(dir)?,
            modifiers: load_modifiers(dir)?,
        })
    }

    pub fn filter(&self, short_name: &str) -> Option<&VideoFilter> {
        self.filters.iter().find(|f| f.short_name == short_name)
    }

    pub fn modifier(&self, short_name: &str) -> Option<&VideoModifier> {
        self.modifiers.iter().find(|m| m.short_name == short_name)
    }

    /// Filter codes for the selected names, ordered by ascending priority
    ///
    /// Unknown names are ignored. Equal priorities keep catalog order.
    pub fn filter_chain(&self, selected: &[String]) -> Vec<String> {
        let mut filters: Vec<&VideoFilter> = self
            .filters
            .iter()
            .filter(|f| selected.contains(&f.short_name))
            .collect();
        filters.sort_by_key(|f| f.priority);
        filters.into_iter().map(|f| f.code.clone()).collect()
    }
}

/// Write the default tables into `dir` when they are missing
pub fn ensure_catalog(dir: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(dir).map_err(|e| EngineError::io(dir.display().to_string(), e))?;

    for (file, contents) in [(FILTERS_FILE, DEFAULT_FILTERS), (MODIFIERS_FILE, DEFAULT_MODIFIERS)] {
        let path = dir.join(file);
        if !path.exists() {
            info!("Writing default {}", path.display());
            std::fs::write(&path, contents).map_err(|e| EngineError::io(path.display().to_string(), e))?;
        }
    }
    Ok(())
}

pub fn load_filters(dir: &Path) -> Result<Vec<VideoFilter>, EngineError> {
    let path = dir.join(FILTERS_FILE);
    let filters = parse_filters(&read_table(&path)?, &path)?;
    debug!("Loaded {} filters from {}", filters.len(), path.display());
    Ok(filters)
}

pub fn load_modifiers(dir: &Path) -> Result<Vec<VideoModifier>, EngineError> {
    let path = dir.join(MODIFIERS_FILE);
    let modifiers = parse_modifiers(&read_table(&path)?, &path)?;
    debug!("Loaded {} modifiers from {}", modifiers.len(), path.display());
    Ok(modifiers)
}

fn read_table(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|e| EngineError::io(path.display().to_string(), e))
}

fn parse_filters(text: &str, path: &Path) -> Result<Vec<VideoFilter>, EngineError> {
    parse_table(text, path)
}

fn parse_modifiers(text: &str, path: &Path) -> Result<Vec<VideoModifier>, EngineError> {
    parse_table(text, path)
}

/// Deserialize a tab-separated table keyed by its header row
///
/// Columns may appear in any order; blank lines are skipped.
fn parse_table<T: DeserializeOwned>(text: &str, path: &Path) -> Result<Vec<T>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    reader
        .deserialize()
        .map(|row| row.map_err(|e| table_error(path, e)))
        .collect()
}

fn table_error(path: &Path, err: csv::Error) -> EngineError {
    let line = err.position().map_or(0, |pos| pos.line() as usize);
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => err.to_string(),
    };
    EngineError::Catalog {
        path: path.display().to_string(),
        line,
        message,
    }
}
