use eyre::{bail, eyre, Context};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::read;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ucl_core::ClassName;
use url::Url;
use walkdir::WalkDir;
use zip::ZipArchive;

/// One code-source location a loader defines classes from.
pub trait ClassSource: Send + Sync {
	fn url(&self) -> &Url;

	/// Reads a `/`-separated entry, `None` if the source has no such entry.
	fn read_entry(&self, path: &str) -> eyre::Result<Option<Vec<u8>>>;

	/// Every file entry of the source as a `/`-separated path.
	fn entries(&self) -> eyre::Result<Vec<String>>;

	fn find_resource(&self, path: &str) -> eyre::Result<Option<Url>>;

	fn try_load(&self, name: &ClassName) -> eyre::Result<Option<Vec<u8>>> {
		match name.resource_path() {
			Some(path) => self.read_entry(&path),
			None => Ok(None),
		}
	}
}

impl<S: ClassSource> ClassSource for Arc<S> {
	fn url(&self) -> &Url {
		(**self).url()
	}

	fn read_entry(&self, path: &str) -> eyre::Result<Option<Vec<u8>>> {
		(**self).read_entry(path)
	}

	fn entries(&self) -> eyre::Result<Vec<String>> {
		(**self).entries()
	}

	fn find_resource(&self, path: &str) -> eyre::Result<Option<Url>> {
		(**self).find_resource(path)
	}

	fn try_load(&self, name: &ClassName) -> eyre::Result<Option<Vec<u8>>> {
		(**self).try_load(name)
	}
}

fn is_relative_entry(path: &str) -> bool {
	!path.is_empty() && !path.starts_with('/') && !path.split('/').any(|v| v == "..")
}

pub struct DirectoryClassSource {
	dir: PathBuf,
	url: Url,
}

impl DirectoryClassSource {
	pub fn new(dir: impl AsRef<Path>) -> eyre::Result<DirectoryClassSource> {
		let dir = std::fs::canonicalize(dir.as_ref())
			.wrap_err_with(|| format!("Failed to resolve {}", dir.as_ref().display()))?;
		if !dir.is_dir() {
			bail!("{} is not a directory", dir.display());
		}

		let url = Url::from_directory_path(&dir)
			.map_err(|_| eyre!("{} cannot be expressed as a URL", dir.display()))?;
		Ok(DirectoryClassSource { dir, url })
	}

	fn entry_path(&self, path: &str) -> Option<PathBuf> {
		if !is_relative_entry(path) {
			return None;
		}

		let path = self.dir.join(path);
		path.is_file().then_some(path)
	}
}

impl ClassSource for DirectoryClassSource {
	fn url(&self) -> &Url {
		&self.url
	}

	fn read_entry(&self, path: &str) -> eyre::Result<Option<Vec<u8>>> {
		let Some(path) = self.entry_path(path) else {
			return Ok(None);
		};

		let data = read(&path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
		Ok(Some(data))
	}

	fn entries(&self) -> eyre::Result<Vec<String>> {
		let mut entries = Vec::new();
		for entry in WalkDir::new(&self.dir).sort_by_file_name() {
			let entry = entry.wrap_err_with(|| format!("Failed to walk {}", self.dir.display()))?;
			if !entry.file_type().is_file() {
				continue;
			}

			let relative = entry.path().strip_prefix(&self.dir)?;
			let parts: Vec<_> = relative
				.components()
				.map(|v| v.as_os_str().to_string_lossy())
				.collect();
			entries.push(parts.join("/"));
		}

		Ok(entries)
	}

	fn find_resource(&self, path: &str) -> eyre::Result<Option<Url>> {
		Ok(self
			.entry_path(path)
			.and_then(|path| Url::from_file_path(path).ok()))
	}
}

pub struct JarClassSource {
	url: Url,
	file_lookup: HashMap<String, usize>,
	archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
}

impl JarClassSource {
	pub fn open(path: impl AsRef<Path>) -> eyre::Result<JarClassSource> {
		let path = std::fs::canonicalize(path.as_ref())
			.wrap_err_with(|| format!("Failed to resolve {}", path.as_ref().display()))?;
		let url = Url::from_file_path(&path)
			.map_err(|_| eyre!("{} cannot be expressed as a URL", path.display()))?;
		let data = read(&path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
		JarClassSource::new(url, data)
	}

	pub fn new(url: Url, data: Vec<u8>) -> eyre::Result<JarClassSource> {
		let reader = Cursor::new(data);
		let archive = ZipArchive::new(reader).wrap_err_with(|| format!("{url} is not a jar"))?;
		let names: Vec<String> = archive.file_names().map(|v| v.to_string()).collect();

		let mut file_lookup = HashMap::new();
		for name in names {
			if name.ends_with('/') {
				continue;
			}

			if let Some(file_index) = archive.index_for_name(&name) {
				file_lookup.insert(name, file_index);
			}
		}

		Ok(JarClassSource {
			url,
			file_lookup,
			archive: Mutex::new(archive),
		})
	}
}

impl ClassSource for JarClassSource {
	fn url(&self) -> &Url {
		&self.url
	}

	fn read_entry(&self, path: &str) -> eyre::Result<Option<Vec<u8>>> {
		if let Some(file_location) = self.file_lookup.get(path) {
			let mut guard = self.archive.lock();
			let mut file = guard.by_index(*file_location)?;

			let mut data = Vec::with_capacity(file.size() as usize);
			file.read_to_end(&mut data)
				.wrap_err_with(|| format!("Failed to inflate {path} from {}", self.url))?;
			return Ok(Some(data));
		}

		Ok(None)
	}

	fn entries(&self) -> eyre::Result<Vec<String>> {
		let mut entries: Vec<String> = self.file_lookup.keys().cloned().collect();
		entries.sort();
		Ok(entries)
	}

	fn find_resource(&self, path: &str) -> eyre::Result<Option<Url>> {
		if !self.file_lookup.contains_key(path) {
			return Ok(None);
		}

		let url = Url::parse(&format!("jar:{}!/{path}", self.url))?;
		Ok(Some(url))
	}
}

/// A source backed by entries held in memory. Mostly useful for embedding and tests.
pub struct MemoryClassSource {
	url: Url,
	entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryClassSource {
	pub fn new(url: &str) -> eyre::Result<MemoryClassSource> {
		let url = Url::parse(url).wrap_err_with(|| format!("Invalid source URL {url:?}"))?;
		Ok(MemoryClassSource {
			url,
			entries: RwLock::new(BTreeMap::new()),
		})
	}

	pub fn with_class(self, name: &str, data: impl Into<Vec<u8>>) -> Self {
		self.insert_class(&ClassName::new(name), data);
		self
	}

	pub fn with_entry(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
		self.insert_entry(path, data);
		self
	}

	pub fn insert_class(&self, name: &ClassName, data: impl Into<Vec<u8>>) {
		if let Some(path) = name.resource_path() {
			self.insert_entry(&path, data);
		}
	}

	pub fn insert_entry(&self, path: &str, data: impl Into<Vec<u8>>) {
		self.entries.write().insert(path.to_string(), data.into());
	}
}

impl ClassSource for MemoryClassSource {
	fn url(&self) -> &Url {
		&self.url
	}

	fn read_entry(&self, path: &str) -> eyre::Result<Option<Vec<u8>>> {
		Ok(self.entries.read().get(path).cloned())
	}

	fn entries(&self) -> eyre::Result<Vec<String>> {
		Ok(self.entries.read().keys().cloned().collect())
	}

	fn find_resource(&self, path: &str) -> eyre::Result<Option<Url>> {
		if !self.entries.read().contains_key(path) {
			return Ok(None);
		}

		let url = Url::parse(&format!("{}/{path}", self.url))?;
		Ok(Some(url))
	}
}
