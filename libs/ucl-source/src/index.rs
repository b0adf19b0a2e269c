use crate::ClassSource;
use eyre::Context;
use std::collections::BTreeSet;
use tracing::debug;

/// Pre-built package listing a jar may carry.
pub const INDEX_MANIFEST: &str = "META-INF/INDEX.LIST";

pub type PackageSet = BTreeSet<String>;

/// Works out which packages a code source contains.
pub struct PackageIndex;

impl PackageIndex {
	/// Enumerates the dotted package names of every entry of `source`, using the
	/// [`INDEX_MANIFEST`] when the source carries one.
	pub fn scan(source: &dyn ClassSource) -> eyre::Result<PackageSet> {
		if let Some(data) = source.read_entry(INDEX_MANIFEST)? {
			let text = String::from_utf8(data)
				.wrap_err_with(|| format!("{INDEX_MANIFEST} of {} is not UTF-8", source.url()))?;
			let packages = Self::parse_manifest(&text);
			if !packages.is_empty() {
				debug!("Indexed {} from {INDEX_MANIFEST}: {packages:?}", source.url());
				return Ok(packages);
			}
		}

		let mut packages = PackageSet::new();
		for entry in source
			.entries()
			.wrap_err_with(|| format!("Failed to list {}", source.url()))?
		{
			if entry.starts_with("META-INF/") {
				continue;
			}

			packages.insert(Self::package_of(&entry));
		}

		debug!("Indexed {} by scanning: {packages:?}", source.url());
		Ok(packages)
	}

	/// The dotted package of a `/`-separated entry path.
	pub fn package_of(entry: &str) -> String {
		entry
			.rsplit_once('/')
			.map(|(dir, _)| dir.replace('/', "."))
			.unwrap_or_default()
	}

	/// Reads the first section of a jar index, which lists the jar's own packages.
	pub fn parse_manifest(text: &str) -> PackageSet {
		let mut sections = text
			.split("\n\n")
			.map(|section| {
				section
					.lines()
					.map(str::trim)
					.filter(|v| !v.is_empty())
					.collect::<Vec<_>>()
			})
			.filter(|section| !section.is_empty());

		let mut packages = PackageSet::new();
		let Some(mut section) = sections.next() else {
			return packages;
		};
		if section[0].starts_with("JarIndex-Version") {
			match sections.next() {
				Some(next) => section = next,
				None => return packages,
			}
		}

		// The first line names the jar itself.
		for line in &section[1..] {
			let line = line.trim_end_matches('/');
			if line.contains('/') || !line.contains('.') {
				packages.insert(line.replace('/', "."));
			} else {
				packages.insert(String::new());
			}
		}

		packages
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryClassSource;

	#[test]
	fn scans_entries() {
		let source = MemoryClassSource::new("memory:scan")
			.unwrap()
			.with_class("com.acme.a.Foo", "")
			.with_class("com.acme.a.impl.FooImpl", "")
			.with_class("Main", "")
			.with_entry("META-INF/MANIFEST.MF", "")
			.with_entry("config/app.properties", "");

		let packages = PackageIndex::scan(&source).unwrap();
		let expected: PackageSet = ["", "com.acme.a", "com.acme.a.impl", "config"]
			.into_iter()
			.map(String::from)
			.collect();
		assert_eq!(packages, expected);
	}

	#[test]
	fn prefers_manifest() {
		let manifest = "JarIndex-Version: 1.0\n\nacme.jar\ncom/acme/a\ncom/acme/b\nMain.class\n\nother.jar\norg/other\n";
		let source = MemoryClassSource::new("memory:indexed")
			.unwrap()
			.with_class("com.acme.a.Foo", "")
			.with_entry(INDEX_MANIFEST, manifest);

		let packages = PackageIndex::scan(&source).unwrap();
		let expected: PackageSet = ["", "com.acme.a", "com.acme.b"]
			.into_iter()
			.map(String::from)
			.collect();
		assert_eq!(packages, expected);
	}

	#[test]
	fn empty_manifest_falls_back() {
		let source = MemoryClassSource::new("memory:broken")
			.unwrap()
			.with_class("com.acme.a.Foo", "")
			.with_entry(INDEX_MANIFEST, "JarIndex-Version: 1.0\n");

		let packages = PackageIndex::scan(&source).unwrap();
		assert!(packages.contains("com.acme.a"));
	}
}
