//! TOML snapshot of committed tasks and actor affiliations.
//!
//! ```toml
//! [[actors]]
//! name = "ada"
//! shards = ["core", "web"]
//!
//! [[tasks]]
//! id = 1
//! shard = "core"
//! status = "unsolved"
//! motive = "defect"
//! purpose = "fix"
//! area = "ui"
//! created = "2024-01-01"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::domain::actor::Actor;
use crate::domain::task::Task;

use super::error::InfraError;
use super::memory::MemoryTaskSource;

#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = fs::read_to_string(path)?;
        let snapshot = Self::parse(path, &raw)?;
        info!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            actors = snapshot.actors.len(),
            "Loaded task snapshot"
        );
        Ok(snapshot)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, InfraError> {
        toml::from_str(raw).map_err(|err| InfraError::snapshot(path, err.to_string()))
    }

    /// The named actor; unknown names get no affiliations.
    pub fn actor(&self, name: &str) -> Actor {
        self.actors
            .iter()
            .find(|actor| actor.name == name)
            .cloned()
            .unwrap_or_else(|| Actor::new(name))
    }

    pub fn into_source(self) -> MemoryTaskSource {
        MemoryTaskSource::with_tasks(self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use time::macros::date;

    use super::*;
    use crate::domain::task::ShardKey;
    use crate::domain::types::Status;

    const SAMPLE: &str = r#"
[[actors]]
name = "ada"
shards = ["core", "web"]

[[tasks]]
id = 1
shard = "core"
status = "unsolved"
motive = "defect"
purpose = "fix"
area = "ui"
participants = ["bob"]
created = "2024-01-01"

[[tasks]]
id = 2
shard = "web"
status = "resolved"
motive = "request"
purpose = "feature"
solver = "ada"
emphasis = 3
revision = 4
created = "2024-02-10"
"#;

    #[test]
    fn loads_tasks_and_actors_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write snapshot");

        let snapshot = Snapshot::load(file.path()).expect("load");
        assert_eq!(snapshot.tasks.len(), 2);
        assert_eq!(snapshot.tasks[0].created, date!(2024 - 01 - 01));
        assert_eq!(snapshot.tasks[1].status, Status::Resolved);
        assert_eq!(snapshot.tasks[1].revision, 4);
        assert!(snapshot.tasks[0].participants.contains("bob"));

        let ada = snapshot.actor("ada");
        assert!(ada.shards.contains(&ShardKey::new("web").expect("valid")));
        assert!(snapshot.actor("nobody").shards.is_empty());

        let source = snapshot.into_source();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let err = Snapshot::parse(Path::new("broken.toml"), "[[tasks]]\nid = \"x\"")
            .expect_err("invalid snapshot");
        assert!(matches!(err, InfraError::Snapshot { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Snapshot::load(Path::new("/definitely/not/here.toml")).expect_err("missing");
        assert!(matches!(err, InfraError::Io(_)));
    }
}
