// src/generated.rs

use crate::error::{Error, Result};
use crate::model::Component;
use crate::rewrite::track_const;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Builds the generated Go package that defines every track ID and the
/// `Track` entry point probes call into.
#[derive(Debug, Clone, Default)]
pub struct TrackFileBuilder {
    package_name: String,
    import_path: String,
    components: Vec<Component>,
    track_ids: BTreeSet<u32>,
}

impl TrackFileBuilder {
    pub fn new(package_name: impl Into<String>, import_path: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            import_path: import_path.into(),
            ..Self::default()
        }
    }

    pub fn add_component(&mut self, id: u32, name: impl Into<String>, track_ids: &[u32]) -> &mut Self {
        self.components.push(Component {
            id,
            name: name.into(),
            track_ids: track_ids.to_vec(),
        });
        self
    }

    pub fn add_track_ids(&mut self, ids: impl IntoIterator<Item = u32>) -> &mut Self {
        self.track_ids.extend(ids);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.package_name.is_empty() || self.import_path.is_empty() {
            return Err(Error::Generated("package name and import path must be set".to_string()));
        }
        if self.track_ids.is_empty() {
            return Err(Error::Generated("no track ids to render".to_string()));
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        self.validate()?;
        let max_id = self.track_ids.iter().next_back().copied().unwrap_or(0);
        let consts: String = self
            .track_ids
            .iter()
            .map(|id| format!("\t{} TrackID = {}\n", track_const(*id), id))
            .collect();
        let components: String = self
            .components
            .iter()
            .map(|c| {
                let ids: Vec<String> = c.track_ids.iter().map(|id| track_const(*id)).collect();
                format!(
                    "\t{{ID: {}, Name: {:?}, TrackIDs: []TrackID{{{}}}}},\n",
                    c.id,
                    c.name,
                    ids.join(", ")
                )
            })
            .collect();
        Ok(format!(
            r#"// Code generated by canary-track. DO NOT EDIT.
// import path: {import_path}

package {package}

import "sync/atomic"

// TrackID identifies one inserted probe.
type TrackID uint32

const (
{consts})

var hits [{size}]uint32

// Track records that the probe with the given id executed.
func Track(id TrackID) {{
	atomic.StoreUint32(&hits[id], 1)
}}

// Hit reports whether the probe with the given id executed.
func Hit(id TrackID) bool {{
	return atomic.LoadUint32(&hits[id]) == 1
}}

// Component groups the probes reachable from one entry point.
type Component struct {{
	ID       int
	Name     string
	TrackIDs []TrackID
}}

var Components = []Component{{
{components}}}
"#,
            import_path = self.import_path,
            package = self.package_name,
            size = max_id + 1,
        ))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.render()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        fs::write(path, text).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), ids = self.track_ids.len(), "wrote generated track file");
        Ok(())
    }

    /// Deletes a previously generated file; a missing file is fine.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed generated track file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::syntax::GoSource;

    #[test]
    fn test_validate_requires_name_and_ids() {
        assert!(TrackFileBuilder::new("", "x/y").validate().is_err());
        assert!(TrackFileBuilder::new("y", "x/y").validate().is_err());
        let mut builder = TrackFileBuilder::new("y", "x/y");
        builder.add_track_ids([1]);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_render_is_valid_go() {
        let mut builder = TrackFileBuilder::new("canarytrack", "example.com/m/canarytrack");
        builder.add_track_ids(1..=3).add_component(1, "cmd/api", &[1, 3]);
        let text = builder.render().unwrap();
        assert!(text.contains("\tID2 TrackID = 2"));
        assert!(text.contains("var hits [4]uint32"));
        assert!(text.contains("{ID: 1, Name: \"cmd/api\", TrackIDs: []TrackID{ID1, ID3}},"));
        assert!(GoSource::parse("canary_track.go", text, Stage::Assign).is_ok());
    }

    #[test]
    fn test_save_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canarytrack").join("canary_track.go");
        let mut builder = TrackFileBuilder::new("canarytrack", "m/canarytrack");
        builder.add_track_ids([1, 2]);
        builder.save(&path).unwrap();
        assert!(path.exists());
        builder.remove(&path).unwrap();
        assert!(!path.exists());
        builder.remove(&path).unwrap();
    }
}
