//! Mapping between editor resources and worker file names.
//!
//! File URIs become forward-slash filesystem paths. Other schemes are
//! in-memory resources; workers that understand them receive the URI itself,
//! with a `^` marker on the basename for newer workers.

use std::path::Path;

use url::Url;

use tslink_types::ServerVersion;

const IN_MEMORY_PREFIX: &str = "^";

/// Version-aware resource mapper for one worker connection.
#[derive(Debug, Clone)]
pub struct PathMapper {
    version: ServerVersion,
}

impl PathMapper {
    #[must_use]
    pub fn new(version: ServerVersion) -> Self {
        Self { version }
    }

    fn in_memory_prefix(&self) -> &'static str {
        if self.version.supports(&ServerVersion::V270) {
            IN_MEMORY_PREFIX
        } else {
            ""
        }
    }

    /// File name to send to the worker for `resource`, or `None` if the
    /// worker cannot address it.
    #[must_use]
    pub fn to_server_path(&self, resource: &str) -> Option<String> {
        let Some(url) = parse_uri(resource) else {
            return Some(forward_slashes(resource));
        };

        if url.scheme() == "file" {
            let path = url.to_file_path().ok()?;
            return Some(forward_slashes(&path.to_string_lossy()));
        }

        if !self.version.supports(&ServerVersion::V213) {
            return None;
        }
        let mut url = url;
        let (dir, name) = split_basename(url.path());
        let path = format!("{dir}{}{name}", self.in_memory_prefix());
        url.set_path(&path);
        Some(url.to_string())
    }

    /// Resource for a file name reported by the worker.
    #[must_use]
    pub fn to_resource(&self, file_name: &str) -> String {
        let file_name = file_name.strip_prefix("/file:").unwrap_or(file_name);

        if self.version.supports(&ServerVersion::V213)
            && !file_name.starts_with("file:")
            && let Some(mut url) = parse_uri(file_name)
        {
            let prefix = self.in_memory_prefix();
            if !prefix.is_empty() {
                let (dir, name) = split_basename(url.path());
                if let Some(stripped) = name.strip_prefix(prefix) {
                    let path = format!("{dir}{stripped}");
                    url.set_path(&path);
                }
            }
            return url.to_string();
        }

        if let Some(url) = parse_uri(file_name)
            && url.scheme() == "file"
        {
            return url.to_string();
        }

        Url::from_file_path(Path::new(file_name))
            .map_or_else(|()| file_name.to_string(), |url| url.to_string())
    }
}

/// Parse `value` as an absolute URI. Windows drive letters are not schemes.
fn parse_uri(value: &str) -> Option<Url> {
    Url::parse(value).ok().filter(|url| url.scheme().len() > 1)
}

fn split_basename(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => (&path[..=index], &path[index + 1..]),
        None => ("", path),
    }
}

fn forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}
