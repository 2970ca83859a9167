//! Gait parameter payload and parameter files
//!
//! # Wire format
//!
//! ```text
//! Parameter := 0x01 (f32 f32 f32) × 7
//! ```
//!
//! Tuples follow [`Gait::ALL`] order. A body whose flag byte is not 0x01
//! carries no parameters and is ignored.
//!
//! # Text format
//!
//! One tuple per line, values then `$` and the gait name:
//!
//! ```text
//! 1.000000000000000000e0	2.500000000000000000e-1	0.000000000000000000e0	$ walk
//! ```
//!
//! `#` starts a comment. Lines without `$` are skipped.

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Flag byte of a parameter body that carries values
pub const PARAMETER_FLAG: u8 = 0x01;

/// Encoded body length
pub const PARAMETER_BODY_LEN: usize = 1 + Gait::ALL.len() * 3 * 4;

/// Default parameter file name
pub const DEFAULT_FILE: &str = "para_default.txt";

/// Named parameter tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gait {
    Init,
    Walk,
    Trot,
    Climb,
    Obstacle,
    Jump,
    Run,
}

impl Gait {
    /// Wire and file order
    pub const ALL: [Gait; 7] = [
        Gait::Init,
        Gait::Walk,
        Gait::Trot,
        Gait::Climb,
        Gait::Obstacle,
        Gait::Jump,
        Gait::Run,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Gait::Init => "init",
            Gait::Walk => "walk",
            Gait::Trot => "trot",
            Gait::Climb => "climb",
            Gait::Obstacle => "obstacle",
            Gait::Jump => "jump",
            Gait::Run => "run",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Gait {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Gait::ALL
            .into_iter()
            .find(|gait| gait.name() == s)
            .ok_or_else(|| Error::UnknownParameter(s.to_string()))
    }
}

/// Seven 3-float tuples: the initial pose plus one per gait
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParameterSet {
    values: [[f32; 3]; 7],
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, gait: Gait) -> [f32; 3] {
        self.values[gait.index()]
    }

    pub fn set(&mut self, gait: Gait, values: [f32; 3]) {
        self.values[gait.index()] = values;
    }

    /// Tuples in wire order
    pub fn iter(&self) -> impl Iterator<Item = (Gait, [f32; 3])> + '_ {
        Gait::ALL.into_iter().map(|gait| (gait, self.get(gait)))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(PARAMETER_BODY_LEN);
        body.push(PARAMETER_FLAG);
        for v in self.values.as_flattened() {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body
    }

    /// Decode a wire body
    ///
    /// Returns `Ok(None)` when the flag byte says the body carries nothing.
    pub fn decode(body: &[u8]) -> Result<Option<Self>> {
        let Some(&flag) = body.first() else {
            return Err(Error::InvalidPacket("empty parameter body".to_string()));
        };
        if flag != PARAMETER_FLAG {
            log::debug!("Parameter body with flag {:#04x} ignored", flag);
            return Ok(None);
        }
        if body.len() < PARAMETER_BODY_LEN {
            return Err(Error::LengthMismatch {
                expected: PARAMETER_BODY_LEN,
                actual: body.len(),
            });
        }

        let mut set = Self::new();
        let words = body[1..PARAMETER_BODY_LEN]
            .chunks_exact(4)
            .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        for (slot, v) in set.values.as_flattened_mut().iter_mut().zip(words) {
            *slot = v;
        }
        Ok(Some(set))
    }

    /// Render in the text file format
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (gait, values) in self.iter() {
            for v in values {
                let _ = write!(text, "{:.18e}\t", f64::from(v));
            }
            let _ = writeln!(text, "$ {}", gait.name());
        }
        text
    }

    /// Overwrite the tuples named in `text`, leaving the others as they are
    ///
    /// The whole text is validated before anything is applied.
    pub fn apply_text(&mut self, text: &str) -> Result<()> {
        let mut parsed = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            let Some(dollar) = line.find('$') else {
                continue;
            };

            let gait: Gait = line[dollar + 1..].trim().parse()?;
            let values = line[..dollar]
                .split_whitespace()
                .map(|s| {
                    s.parse::<f32>().map_err(|e| {
                        Error::InvalidPacket(format!("line {}: bad value {:?}: {}", lineno + 1, s, e))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            let tuple: [f32; 3] = values.as_slice().try_into().map_err(|_| {
                Error::InvalidPacket(format!(
                    "line {}: {} expects 3 values, got {}",
                    lineno + 1,
                    gait.name(),
                    values.len()
                ))
            })?;
            parsed.push((gait, tuple));
        }

        for (gait, tuple) in parsed {
            self.set(gait, tuple);
        }
        Ok(())
    }

    /// Parse a complete file; tuples it does not name stay zero
    pub fn from_text(text: &str) -> Result<Self> {
        let mut set = Self::new();
        set.apply_text(text)?;
        Ok(set)
    }
}

/// Parameter files in one directory
///
/// Holds `para_default.txt` and one timestamped snapshot name for this
/// session, `para_<yymmddHHMMSS>.txt`.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    dir: PathBuf,
    snapshot: String,
}

impl ParameterStore {
    /// Use `dir`, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let snapshot = chrono::Local::now()
            .format("para_%y%m%d%H%M%S.txt")
            .to_string();
        Ok(Self { dir, snapshot })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_path(&self) -> PathBuf {
        self.dir.join(DEFAULT_FILE)
    }

    /// Path this session's snapshots are written to
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot)
    }

    /// Load the default file, writing an all-zero one if it is missing
    pub fn load_default(&self) -> Result<ParameterSet> {
        let path = self.default_path();
        match fs::read_to_string(&path) {
            Ok(text) => ParameterSet::from_text(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("{} missing, writing defaults", path.display());
                let set = ParameterSet::new();
                self.save(&path, &set)?;
                Ok(set)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ParameterSet> {
        let text = fs::read_to_string(path)?;
        ParameterSet::from_text(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, set: &ParameterSet) -> Result<()> {
        fs::write(path, set.to_text())?;
        Ok(())
    }

    pub fn save_default(&self, set: &ParameterSet) -> Result<()> {
        self.save(self.default_path(), set)
    }

    /// Write this session's snapshot and return its path
    pub fn save_snapshot(&self, set: &ParameterSet) -> Result<PathBuf> {
        let path = self.snapshot_path();
        self.save(&path, set)?;
        log::info!("Parameters saved to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        let mut set = ParameterSet::new();
        set.set(Gait::Init, [0.1, 0.2, 0.3]);
        set.set(Gait::Trot, [1.5, -2.0, 3.25]);
        set.set(Gait::Run, [9.0, 8.0, 7.0]);
        set
    }

    #[test]
    fn test_gait_names() {
        let names: Vec<_> = Gait::ALL.iter().map(|g| g.name()).collect();
        assert_eq!(
            names,
            ["init", "walk", "trot", "climb", "obstacle", "jump", "run"]
        );
        assert_eq!("obstacle".parse::<Gait>().unwrap(), Gait::Obstacle);
        assert!(matches!(
            "gallop".parse::<Gait>(),
            Err(Error::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_wire_layout() {
        let body = sample().encode();
        assert_eq!(body.len(), PARAMETER_BODY_LEN);
        assert_eq!(body.len(), 85);
        assert_eq!(body[0], 0x01);
        // trot is the third tuple
        assert_eq!(&body[25..29], &1.5f32.to_le_bytes());
        assert_eq!(&body[81..85], &7.0f32.to_le_bytes());
    }

    #[test]
    fn test_wire_decode() {
        let set = sample();
        assert_eq!(ParameterSet::decode(&set.encode()).unwrap(), Some(set));
    }

    #[test]
    fn test_flag_not_set_ignored() {
        let mut body = sample().encode();
        body[0] = 0x00;
        assert_eq!(ParameterSet::decode(&body).unwrap(), None);
    }

    #[test]
    fn test_short_body_rejected() {
        let body = sample().encode();
        assert!(matches!(
            ParameterSet::decode(&body[..40]),
            Err(Error::LengthMismatch {
                expected: 85,
                actual: 40
            })
        ));
        assert!(ParameterSet::decode(&[]).is_err());
    }

    #[test]
    fn test_text_format() {
        let text = sample().to_text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].ends_with("\t$ init"));
        assert!(lines[2].starts_with("1.500000000000000000e0\t"));
        assert_eq!(ParameterSet::from_text(&text).unwrap(), sample());
    }

    #[test]
    fn test_text_comments_and_partial_files() {
        let text = "\
# gait tuning
   1 2 3 $ walk   # after field test
this line has no marker
# 4 5 6 $ jump
";
        let mut set = sample();
        set.apply_text(text).unwrap();
        assert_eq!(set.get(Gait::Walk), [1.0, 2.0, 3.0]);
        assert_eq!(set.get(Gait::Jump), [0.0, 0.0, 0.0]);
        assert_eq!(set.get(Gait::Trot), [1.5, -2.0, 3.25]);
    }

    #[test]
    fn test_text_errors_apply_nothing() {
        let mut set = ParameterSet::new();
        let err = set.apply_text("1 1 1 $ walk\n2 2 $ trot\n").unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
        assert_eq!(set, ParameterSet::new());

        assert!(matches!(
            set.apply_text("1 2 3 $ gallop"),
            Err(Error::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_store_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::open(dir.path().join("para")).unwrap();

        assert!(!store.default_path().exists());
        let set = store.load_default().unwrap();
        assert_eq!(set, ParameterSet::new());
        assert!(store.default_path().exists());
    }

    #[test]
    fn test_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::open(dir.path()).unwrap();

        store.save_default(&sample()).unwrap();
        assert_eq!(store.load_default().unwrap(), sample());

        let path = store.save_snapshot(&sample()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("para_") && name.ends_with(".txt"));
        assert_eq!(name.len(), "para_".len() + 12 + ".txt".len());
        assert_eq!(store.load(&path).unwrap(), sample());
    }
}
