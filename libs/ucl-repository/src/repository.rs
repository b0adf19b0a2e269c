use crate::{
	Class, ClassDefiner, Loader, LoaderBuilder, LoaderId, OpaqueDefiner, RepositoryEvent,
	RepositoryListener, TaskScheduler,
};
use ahash::{HashMap, HashMapExt, HashSet};
use eyre::{bail, Context};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};
use ucl_core::{
	CandidatePolicy, ClassName, LoadError, LoadResult, RepositoryConfig, SectionStrategy,
};
use ucl_source::{ClassSource, PackageIndex, PackageSet, Url};

/// A loader that may define a class, and its position in the lookup order.
#[derive(Clone)]
pub struct Candidate {
	pub order: usize,
	pub loader: Arc<Loader>,
}

/// The flat namespace a set of loaders share.
pub struct Repository {
	this: Weak<Repository>,
	config: RepositoryConfig,
	parent: Option<Arc<Repository>>,
	scheduler: Arc<TaskScheduler>,
	definer: RwLock<Arc<dyn ClassDefiner>>,
	listeners: RwLock<Vec<Arc<dyn RepositoryListener>>>,
	loaders: RwLock<LoaderTable>,
	classes: RwLock<ClassCache>,
}

struct LoaderTable {
	by_order: BTreeMap<u32, Arc<Loader>>,
	by_id: HashMap<LoaderId, u32>,
	urls: HashMap<Url, LoaderId>,
	packages: HashMap<String, BTreeMap<u32, Arc<Loader>>>,
	loader_packages: HashMap<LoaderId, PackageSet>,
	next_order: u32,
}

struct ClassCache {
	by_name: HashMap<ClassName, Arc<Class>>,
	/// Names cached on behalf of each loader, for eviction.
	by_loader: HashMap<LoaderId, HashSet<ClassName>>,
}

impl Repository {
	pub fn new(config: RepositoryConfig) -> Arc<Repository> {
		let scheduler = Arc::new(TaskScheduler::new(&config));
		Self::create(config, None, scheduler, Arc::new(OpaqueDefiner))
	}

	/// A repository whose lookups also see `parent`. Both share one scheduler so that loads
	/// crossing the two cooperate.
	pub fn with_parent(parent: &Arc<Repository>, config: RepositoryConfig) -> Arc<Repository> {
		let definer = parent.definer.read().clone();
		Self::create(
			config,
			Some(parent.clone()),
			parent.scheduler.clone(),
			definer,
		)
	}

	fn create(
		config: RepositoryConfig,
		parent: Option<Arc<Repository>>,
		scheduler: Arc<TaskScheduler>,
		definer: Arc<dyn ClassDefiner>,
	) -> Arc<Repository> {
		Arc::new_cyclic(|this| Repository {
			this: this.clone(),
			config,
			parent,
			scheduler,
			definer: RwLock::new(definer),
			listeners: RwLock::new(Vec::new()),
			loaders: RwLock::new(LoaderTable {
				by_order: BTreeMap::new(),
				by_id: HashMap::new(),
				urls: HashMap::new(),
				packages: HashMap::new(),
				loader_packages: HashMap::new(),
				next_order: 0,
			}),
			classes: RwLock::new(ClassCache {
				by_name: HashMap::new(),
				by_loader: HashMap::new(),
			}),
		})
	}

	pub fn config(&self) -> &RepositoryConfig {
		&self.config
	}

	pub fn parent(&self) -> Option<&Arc<Repository>> {
		self.parent.as_ref()
	}

	pub fn scheduler(&self) -> &Arc<TaskScheduler> {
		&self.scheduler
	}

	/// The definer new loaders get unless their builder says otherwise.
	pub fn set_default_definer(&self, definer: Arc<dyn ClassDefiner>) {
		*self.definer.write() = definer;
	}

	pub fn add_listener(&self, listener: impl RepositoryListener + 'static) {
		self.listeners.write().push(Arc::new(listener));
	}

	fn emit(&self, event: RepositoryEvent) {
		let listeners = self.listeners.read().clone();
		for listener in listeners {
			listener.handle(&event);
		}
	}

	/// Starts a loader for `source`. It takes part in lookups once registered.
	pub fn loader(&self, source: impl ClassSource + 'static) -> LoaderBuilder {
		LoaderBuilder::new(
			self.scheduler.next_loader_id(),
			self.this.clone(),
			Box::new(source),
			self.definer.read().clone(),
		)
	}

	/// Creates and registers a loader for `source`. Returns the already registered loader if
	/// one exists for the same URL.
	pub fn add_loader(&self, source: impl ClassSource + 'static) -> eyre::Result<Arc<Loader>> {
		let loader = self.loader(source).build();
		if self.register_loader(&loader)? {
			return Ok(loader);
		}

		match self.loader_for_url(loader.url()) {
			Some(existing) => Ok(existing),
			None => bail!("{loader} was neither registered nor replaced"),
		}
	}

	/// Indexes `loader`'s packages and makes it visible to lookups. Registering a second loader
	/// for a URL that is already registered does nothing and returns `false`.
	pub fn register_loader(&self, loader: &Arc<Loader>) -> eyre::Result<bool> {
		if !loader.belongs_to(&self.this) {
			bail!("{loader} was created by another repository");
		}

		let mut packages = PackageSet::new();
		for source in loader.sources().iter() {
			let scanned = PackageIndex::scan(&**source)
				.wrap_err_with(|| format!("Failed to index {}", source.url()))?;
			packages.extend(scanned);
		}

		let mut table = self.loaders.write();
		if table.by_id.contains_key(&loader.id()) {
			debug!("{loader} is already registered");
			return Ok(false);
		}
		if let Some(existing) = table.urls.get(loader.url()) {
			info!("Ignoring {loader}, Loader{existing} already serves its URL");
			return Ok(false);
		}

		let order = table.next_order;
		table.next_order += 1;
		table.by_order.insert(order, loader.clone());
		table.by_id.insert(loader.id(), order);
		table.urls.insert(loader.url().clone(), loader.id());
		for package in &packages {
			table
				.packages
				.entry(package.clone())
				.or_default()
				.insert(order, loader.clone());
		}
		table.loader_packages.insert(loader.id(), packages);
		loader.set_added_order(Some(order));
		drop(table);

		info!("Registered {loader} as #{order}");
		self.emit(RepositoryEvent::LoaderAdded {
			loader: loader.id(),
			url: loader.url().clone(),
		});
		Ok(true)
	}

	/// Removes `loader`, evicting every class cached on its behalf. Returns `false` if it was not
	/// registered.
	pub fn unregister_loader(&self, loader: &Loader) -> bool {
		let evicted = {
			let mut table = self.loaders.write();
			let Some(order) = table.by_id.remove(&loader.id()) else {
				return false;
			};

			table.by_order.remove(&order);
			table.urls.remove(loader.url());
			let packages = table.loader_packages.remove(&loader.id()).unwrap_or_default();
			for package in packages {
				if let Some(loaders) = table.packages.get_mut(&package) {
					loaders.remove(&order);
					if loaders.is_empty() {
						table.packages.remove(&package);
					}
				}
			}
			loader.set_added_order(None);

			let mut classes = self.classes.write();
			let names = classes.by_loader.remove(&loader.id()).unwrap_or_default();
			for name in &names {
				classes.by_name.remove(name);
			}
			names
		};

		loader.clear_caches();
		info!("Unregistered {loader}, evicted {} classes", evicted.len());
		for name in evicted {
			self.emit(RepositoryEvent::ClassRemoved {
				loader: loader.id(),
				name,
			});
		}
		self.emit(RepositoryEvent::LoaderRemoved {
			loader: loader.id(),
			url: loader.url().clone(),
		});
		true
	}

	/// Adds a code source to `loader` and indexes it.
	pub fn add_loader_source(
		&self,
		loader: &Loader,
		source: impl ClassSource + 'static,
	) -> eyre::Result<()> {
		let packages = PackageIndex::scan(&source)
			.wrap_err_with(|| format!("Failed to index {}", source.url()))?;
		debug!("Adding {} to {loader}", source.url());
		loader.push_source(Box::new(source));

		let mut table = self.loaders.write();
		let Some(order) = table.by_id.get(&loader.id()).copied() else {
			return Ok(());
		};
		let Some(loader) = table.by_order.get(&order).cloned() else {
			return Ok(());
		};
		for package in &packages {
			table
				.packages
				.entry(package.clone())
				.or_default()
				.insert(order, loader.clone());
		}
		table
			.loader_packages
			.entry(loader.id())
			.or_default()
			.extend(packages);
		Ok(())
	}

	pub fn loader_for_url(&self, url: &Url) -> Option<Arc<Loader>> {
		let table = self.loaders.read();
		let order = table.by_id.get(table.urls.get(url)?)?;
		table.by_order.get(order).cloned()
	}

	/// Registered loaders in insertion order.
	pub fn class_loaders(&self) -> Vec<Arc<Loader>> {
		self.loaders.read().by_order.values().cloned().collect()
	}

	/// Loaders of this repository whose code source contains `package`, in insertion order.
	pub fn package_loaders(&self, package: &str) -> Vec<Arc<Loader>> {
		self.loaders
			.read()
			.packages
			.get(package)
			.map(|loaders| loaders.values().cloned().collect())
			.unwrap_or_default()
	}

	fn package_chain(&self, package: &str) -> Vec<Arc<Loader>> {
		let local = self.package_loaders(package);
		let Some(parent) = &self.parent else {
			return local;
		};

		let inherited = parent.package_chain(package);
		if self.config.parent_first {
			inherited.into_iter().chain(local).collect()
		} else {
			local.into_iter().chain(inherited).collect()
		}
	}

	/// Loaders known to contain the package of `name`, ordered by the position they are tried in.
	/// Empty when no loader is known to, in which case the requesting loader is asked directly.
	pub fn candidate_loaders_for(&self, name: &ClassName) -> Vec<Candidate> {
		self.package_chain(name.package())
			.into_iter()
			.enumerate()
			.map(|(order, loader)| Candidate { order, loader })
			.collect()
	}

	/// Probes the global cache. Never blocks on a load.
	pub fn lookup_cached(&self, name: &ClassName) -> Option<Arc<Class>> {
		let local = || self.classes.read().by_name.get(name).cloned();
		let Some(parent) = &self.parent else {
			return local();
		};

		if self.config.parent_first {
			parent.lookup_cached(name).or_else(local)
		} else {
			local().or_else(|| parent.lookup_cached(name))
		}
	}

	/// Caches `class` as defined by `owner` and returns the class the cache holds for `name`.
	///
	/// The first class cached for a name stays; a different one is reported as a duplicate and
	/// dropped. Nothing is cached for a loader that is no longer registered.
	pub fn cache_resolved_class(
		&self,
		name: &ClassName,
		class: Arc<Class>,
		owner: &Loader,
	) -> Arc<Class> {
		let table = self.loaders.read();
		if !table.by_id.contains_key(&owner.id()) {
			debug!("Not caching {name}, {owner} is not registered");
			return class;
		}

		let mut classes = self.classes.write();
		if let Some(existing) = classes.by_name.get(name) {
			if !Arc::ptr_eq(existing, &class) {
				warn!(
					"Duplicate definition of {name} by {owner}, keeping the one of Loader{}",
					existing.loader()
				);
			}
			return existing.clone();
		}

		classes.by_name.insert(name.clone(), class.clone());
		classes
			.by_loader
			.entry(owner.id())
			.or_default()
			.insert(name.clone());
		class
	}

	pub fn cache_size(&self) -> usize {
		self.classes.read().by_name.len()
	}

	/// Empties the global cache. Loaders keep their own caches, so reloading yields the same
	/// classes.
	pub fn flush(&self) {
		let mut classes = self.classes.write();
		debug!("Flushing {} cached classes", classes.by_name.len());
		classes.by_name.clear();
		classes.by_loader.clear();
	}

	/// Loads `name` as seen by `requesting`.
	pub fn load_class(&self, name: &ClassName, requesting: &Arc<Loader>) -> LoadResult<Arc<Class>> {
		match self.config.strategy {
			SectionStrategy::Cooperative => self.scheduler.load(self, name, requesting),
			SectionStrategy::Exclusive => self.load_exclusive(name, requesting),
		}
	}

	/// Takes each candidate's section on the calling thread. Two threads needing each other's
	/// loaders only get out of this by timing out.
	fn load_exclusive(&self, name: &ClassName, requesting: &Arc<Loader>) -> LoadResult<Arc<Class>> {
		if let Some(class) = self.lookup_cached(name) {
			return Ok(class);
		}

		let mut candidates = self.candidate_loaders_for(name);
		if candidates.is_empty() {
			candidates.push(Candidate {
				order: 0,
				loader: requesting.clone(),
			});
		}
		if self.config.candidates == CandidatePolicy::First {
			candidates.truncate(1);
		}

		let deadline = Instant::now() + self.config.load_timeout;
		let mut error = LoadError::not_found(name);
		for Candidate { loader, .. } in candidates {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if !loader.section().try_acquire(remaining) {
				warn!("Timed out waiting for {loader} to load {name}");
				return Err(LoadError::interrupted(name));
			}

			let result = loader.define_locally(name, &mut |dependency| loader.load_class(dependency));
			loader.section().release();
			match result {
				Ok(class) => {
					return Ok(match loader.repository() {
						Some(repository) => repository.cache_resolved_class(name, class, &loader),
						None => class,
					});
				}
				Err(miss) if miss.is_not_found() && !miss.is_interrupted() => error = miss,
				Err(fatal) => return Err(fatal),
			}
		}

		Err(error)
	}

	/// Finds a resource as seen by `requesting`.
	pub fn get_resource(&self, path: &str, requesting: &Loader) -> Option<Url> {
		self.find_resource(path, Some(requesting))
	}

	fn find_resource(&self, path: &str, requesting: Option<&Loader>) -> Option<Url> {
		let local = || self.find_local_resource(path, requesting);
		let Some(parent) = &self.parent else {
			return local();
		};

		if self.config.parent_first {
			parent.find_resource(path, None).or_else(local)
		} else {
			local().or_else(|| parent.find_resource(path, None))
		}
	}

	fn find_local_resource(&self, path: &str, requesting: Option<&Loader>) -> Option<Url> {
		let requesting = requesting.filter(|loader| loader.belongs_to(&self.this));
		if let Some(url) = requesting.and_then(|loader| loader.find_resource_locally(path)) {
			return Some(url);
		}

		self.package_loaders(&PackageIndex::package_of(path))
			.into_iter()
			.filter(|loader| Some(loader.id()) != requesting.map(|v| v.id()))
			.find_map(|loader| loader.find_resource_locally(path))
	}

	/// Describes where `name` stands in this repository.
	pub fn display_class_info(&self, name: &ClassName) -> String {
		let mut out = String::new();
		let _ = writeln!(out, "{name}");
		match self.lookup_cached(name) {
			Some(class) => {
				let _ = writeln!(out, "  cached: Loader{}", class.loader());
				if let Some(source) = class.source() {
					let _ = writeln!(out, "  source: {source}");
				}
				for link in class.links() {
					let _ = writeln!(out, "  links: {} (Loader{})", link.name(), link.loader());
				}
			}
			None => {
				let _ = writeln!(out, "  not cached");
			}
		}

		let candidates = self.candidate_loaders_for(name);
		if candidates.is_empty() {
			let _ = writeln!(out, "  no candidate loaders for package {:?}", name.package());
		}
		for Candidate { order, loader } in candidates {
			let state = if loader.cached_class(name).is_some() {
				"defined"
			} else if loader.is_blacklisted(name) {
				"not found"
			} else {
				"not tried"
			};
			let _ = writeln!(out, "  candidate {order}: {loader} ({state})");
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::LinkDefiner;
	use crossbeam::channel::unbounded;
	use std::time::Duration;
	use ucl_source::MemoryClassSource;

	fn memory(url: &str, classes: &[&str]) -> MemoryClassSource {
		let mut source = MemoryClassSource::new(url).unwrap();
		for class in classes {
			source = source.with_class(class, *class);
		}
		source
	}

	#[test]
	fn duplicate_urls_are_ignored() {
		let repository = Repository::new(RepositoryConfig::default());
		let first = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		let second = repository.loader(memory("memory:a", &[])).build();

		assert!(!repository.register_loader(&second).unwrap());
		assert!(!repository.register_loader(&first).unwrap());
		assert!(!second.is_registered());
		assert_eq!(repository.class_loaders().len(), 1);

		let again = repository.add_loader(memory("memory:a", &[])).unwrap();
		assert!(Arc::ptr_eq(&again, &first));
	}

	#[test]
	fn foreign_loaders_are_rejected() {
		let repository = Repository::new(RepositoryConfig::default());
		let other = Repository::new(RepositoryConfig::default());
		let loader = other.loader(memory("memory:a", &[])).build();
		assert!(repository.register_loader(&loader).is_err());
	}

	#[test]
	fn candidates_follow_insertion_order() {
		let repository = Repository::new(RepositoryConfig::default());
		let a = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		let b = repository.add_loader(memory("memory:b", &["com.acme.b.Bar"])).unwrap();
		let a2 = repository.add_loader(memory("memory:a2", &["com.acme.a.Qux"])).unwrap();

		let candidates = repository.candidate_loaders_for(&ClassName::new("com.acme.a.Whatever"));
		let ids: Vec<_> = candidates.iter().map(|v| (v.order, v.loader.id())).collect();
		assert_eq!(ids, vec![(0, a.id()), (1, a2.id())]);

		let arrays = repository.candidate_loaders_for(&ClassName::new("[[Lcom.acme.b.Bar;"));
		assert_eq!(arrays.len(), 1);
		assert_eq!(arrays[0].loader.id(), b.id());

		assert!(repository
			.candidate_loaders_for(&ClassName::new("org.other.Thing"))
			.is_empty());
		assert_eq!(a.added_order(), Some(0));
		assert_eq!(a2.added_order(), Some(2));
	}

	#[test]
	fn first_cached_class_wins() {
		let repository = Repository::new(RepositoryConfig::default());
		let a = repository.add_loader(memory("memory:a", &[])).unwrap();
		let b = repository.add_loader(memory("memory:b", &[])).unwrap();
		let name = ClassName::new("com.acme.a.Foo");
		let class = |loader: &Loader| {
			Arc::new(Class::instance(name.clone(), loader.id(), loader.url().clone(), 0, vec![]))
		};

		let first = repository.cache_resolved_class(&name, class(&a), &a);
		let second = repository.cache_resolved_class(&name, class(&b), &b);
		assert!(Arc::ptr_eq(&first, &second));
		assert!(Arc::ptr_eq(&repository.lookup_cached(&name).unwrap(), &first));
		assert_eq!(repository.cache_size(), 1);

		let detached = repository.loader(memory("memory:c", &[])).build();
		let bar = ClassName::new("com.acme.c.Bar");
		let uncached = Arc::new(Class::instance(
			bar.clone(),
			detached.id(),
			detached.url().clone(),
			0,
			vec![],
		));
		let returned = repository.cache_resolved_class(&bar, uncached.clone(), &detached);
		assert!(Arc::ptr_eq(&returned, &uncached));
		assert!(repository.lookup_cached(&bar).is_none());
	}

	#[test]
	fn unregister_evicts() {
		let repository = Repository::new(RepositoryConfig::default());
		repository.set_default_definer(Arc::new(
			LinkDefiner::default().links("com.acme.b.Bar", &["com.acme.a.Foo"]),
		));
		let (sender, receiver) = unbounded();
		repository.add_listener(sender);

		let a = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		let b = repository.add_loader(memory("memory:b", &["com.acme.b.Bar"])).unwrap();
		let bar = b.load_class(&ClassName::new("com.acme.b.Bar")).unwrap();
		assert_eq!(bar.links()[0].loader(), a.id());
		assert_eq!(repository.cache_size(), 2);

		assert!(repository.unregister_loader(&a));
		assert!(!repository.unregister_loader(&a));
		let foo = ClassName::new("com.acme.a.Foo");
		assert!(repository.lookup_cached(&foo).is_none());
		assert!(repository.candidate_loaders_for(&foo).is_empty());
		assert!(repository.lookup_cached(&ClassName::new("com.acme.b.Bar")).is_some());
		assert!(!a.is_registered());

		let events: Vec<_> = receiver.try_iter().collect();
		assert_eq!(
			events,
			vec![
				RepositoryEvent::LoaderAdded {
					loader: a.id(),
					url: a.url().clone()
				},
				RepositoryEvent::LoaderAdded {
					loader: b.id(),
					url: b.url().clone()
				},
				RepositoryEvent::ClassRemoved {
					loader: a.id(),
					name: foo.clone()
				},
				RepositoryEvent::LoaderRemoved {
					loader: a.id(),
					url: a.url().clone()
				},
			]
		);
	}

	#[test]
	fn unregistered_loaders_stop_caching() {
		let repository = Repository::new(RepositoryConfig::default());
		repository.set_default_definer(Arc::new(LinkDefiner::default()));
		let a = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		assert!(repository.unregister_loader(&a));

		// A definition that was already running when the loader went away.
		let foo = ClassName::new("com.acme.a.Foo");
		let missing = ClassName::new("com.acme.a.Missing");
		assert!(a.section().try_acquire(Duration::ZERO));
		let defined = a.define_locally(&foo, &mut |dependency| Err(LoadError::not_found(dependency)));
		let not_found = a.define_locally(&missing, &mut |dependency| {
			Err(LoadError::not_found(dependency))
		});
		a.section().release();

		assert_eq!(defined.unwrap().name(), &foo);
		assert!(not_found.unwrap_err().is_not_found());
		assert_eq!(a.cached_class_count(), 0);
		assert!(!a.is_blacklisted(&missing));
		assert!(repository.lookup_cached(&foo).is_none());

		assert!(repository.register_loader(&a).unwrap());
		let foo_again = a.load_class(&foo).unwrap();
		assert_eq!(a.cached_class_count(), 1);
		assert!(Arc::ptr_eq(&repository.lookup_cached(&foo).unwrap(), &foo_again));
	}

	#[test]
	fn added_sources_are_indexed() {
		let repository = Repository::new(RepositoryConfig::default());
		let a = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		let late = ClassName::new("com.acme.late.Late");
		assert!(a.load_class(&late).is_err());

		repository
			.add_loader_source(&a, memory("memory:a-extra", &["com.acme.late.Late"]))
			.unwrap();
		assert_eq!(repository.package_loaders("com.acme.late").len(), 1);
		let class = a.load_class(&late).unwrap();
		assert_eq!(class.source().unwrap().as_str(), "memory:a-extra");
	}

	#[test]
	fn parent_order() {
		for parent_first in [true, false] {
			let parent = Repository::new(RepositoryConfig::default());
			let config = RepositoryConfig {
				parent_first,
				..RepositoryConfig::default()
			};
			let child = Repository::with_parent(&parent, config);
			assert!(Arc::ptr_eq(parent.scheduler(), child.scheduler()));

			let shared = parent.add_loader(memory("memory:parent", &["com.acme.a.Foo"])).unwrap();
			let local = child.add_loader(memory("memory:child", &["com.acme.a.Foo"])).unwrap();

			let name = ClassName::new("com.acme.a.Foo");
			let candidates = child.candidate_loaders_for(&name);
			let first = &candidates[0].loader;
			let expected = if parent_first { &shared } else { &local };
			assert_eq!(first.id(), expected.id());

			let foo = local.load_class(&name).unwrap();
			assert_eq!(foo.loader(), expected.id());
			assert!(Arc::ptr_eq(&child.lookup_cached(&name).unwrap(), &foo));
			assert_eq!(parent.lookup_cached(&name).is_some(), parent_first);
		}
	}

	#[test]
	fn resources() {
		let repository = Repository::new(RepositoryConfig::default());
		let a = repository
			.add_loader(memory("memory:a", &[]).with_entry("config/a.properties", "a"))
			.unwrap();
		let b = repository
			.add_loader(memory("memory:b", &[]).with_entry("config/b.properties", "b"))
			.unwrap();

		let url = a.get_resource("config/b.properties").unwrap();
		assert_eq!(url.as_str(), "memory:b/config/b.properties");
		assert!(b.get_resource("config/a.properties").is_some());
		assert!(a.get_resource("config/c.properties").is_none());
	}

	#[test]
	fn exclusive_strategy() {
		let config = RepositoryConfig {
			strategy: SectionStrategy::Exclusive,
			..RepositoryConfig::default()
		};
		let repository = Repository::new(config);
		repository.set_default_definer(Arc::new(
			LinkDefiner::default().links("com.acme.a.Foo", &["com.acme.b.Bar", "com.acme.a.Qux"]),
		));
		let a = repository
			.add_loader(memory("memory:a", &["com.acme.a.Foo", "com.acme.a.Qux"]))
			.unwrap();
		repository.add_loader(memory("memory:b", &["com.acme.b.Bar"])).unwrap();

		let foo = a.load_class(&ClassName::new("com.acme.a.Foo")).unwrap();
		assert_eq!(foo.links().len(), 2);
		assert_eq!(repository.cache_size(), 3);
		assert_eq!(repository.scheduler().stats(), Default::default());
		assert!(!a.section().is_locked());
	}

	#[test]
	fn class_info() {
		let repository = Repository::new(RepositoryConfig::default());
		let a = repository.add_loader(memory("memory:a", &["com.acme.a.Foo"])).unwrap();
		let name = ClassName::new("com.acme.a.Foo");

		assert!(repository.display_class_info(&name).contains("not cached"));
		a.load_class(&name).unwrap();
		let info = repository.display_class_info(&name);
		assert!(info.contains(&format!("cached: Loader{}", a.id())), "{info}");
		assert!(info.contains("(defined)"), "{info}");

		repository.flush();
		assert_eq!(repository.cache_size(), 0);
		let again = a.load_class(&name).unwrap();
		assert!(Arc::ptr_eq(&again, &a.cached_class(&name).unwrap()));
	}
}
