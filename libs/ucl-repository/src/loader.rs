use crate::{ArrayComponent, Class, ClassDefiner, ClassResolver, LoadSection, Repository};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use ucl_core::{ClassName, Component, LoadError, LoadResult, RepositoryConfig};
use ucl_source::{ClassSource, Url};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct LoaderId(pub(crate) u32);

impl LoaderId {
	pub fn idx(&self) -> u32 {
		self.0
	}
}

impl Display for LoaderId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

const UNREGISTERED: u32 = u32::MAX;

/// Defines classes from its own code sources, one definition at a time.
pub struct Loader {
	id: LoaderId,
	url: Url,
	original_url: Option<Url>,
	repository: Weak<Repository>,
	definer: Arc<dyn ClassDefiner>,
	section: LoadSection,
	added_order: AtomicU32,
	/// Unregistered from its repository. Definitions still in flight are not cached any more.
	retired: AtomicBool,
	sources: RwLock<Vec<Box<dyn ClassSource>>>,
	classes: Mutex<HashMap<ClassName, Arc<Class>>>,
	blacklist: Mutex<HashSet<ClassName>>,
	resources: Mutex<HashMap<String, Url>>,
	resource_blacklist: Mutex<HashSet<String>>,
	/// Names whose definition is in progress, always on the thread holding the section.
	defining: Mutex<HashSet<ClassName>>,
}

/// Removes a name from the in-progress set even if the definer panics.
struct DefiningGuard<'a> {
	loader: &'a Loader,
	name: &'a ClassName,
}

impl Drop for DefiningGuard<'_> {
	fn drop(&mut self) {
		self.loader.defining.lock().remove(self.name);
	}
}

impl Loader {
	pub(crate) fn new(
		id: LoaderId,
		repository: Weak<Repository>,
		source: Box<dyn ClassSource>,
		definer: Arc<dyn ClassDefiner>,
		original_url: Option<Url>,
	) -> Loader {
		Loader {
			id,
			url: source.url().clone(),
			original_url,
			repository,
			definer,
			section: LoadSection::new(),
			added_order: AtomicU32::new(UNREGISTERED),
			retired: AtomicBool::new(false),
			sources: RwLock::new(vec![source]),
			classes: Mutex::new(HashMap::new()),
			blacklist: Mutex::new(HashSet::new()),
			resources: Mutex::new(HashMap::new()),
			resource_blacklist: Mutex::new(HashSet::new()),
			defining: Mutex::new(HashSet::new()),
		}
	}

	pub fn id(&self) -> LoaderId {
		self.id
	}

	/// The code source this loader was created for. Identifies the loader within a repository.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Label used for security policy only.
	pub fn original_url(&self) -> &Url {
		self.original_url.as_ref().unwrap_or(&self.url)
	}

	pub fn section(&self) -> &LoadSection {
		&self.section
	}

	pub fn repository(&self) -> Option<Arc<Repository>> {
		self.repository.upgrade()
	}

	pub(crate) fn belongs_to(&self, repository: &Weak<Repository>) -> bool {
		Weak::ptr_eq(&self.repository, repository)
	}

	/// Insertion sequence within the repository, `None` while not registered.
	pub fn added_order(&self) -> Option<u32> {
		match self.added_order.load(Ordering::Acquire) {
			UNREGISTERED => None,
			order => Some(order),
		}
	}

	/// Clearing the order retires the loader until it is registered again.
	pub(crate) fn set_added_order(&self, order: Option<u32>) {
		self.retired.store(order.is_none(), Ordering::Release);
		self.added_order
			.store(order.unwrap_or(UNREGISTERED), Ordering::Release);
	}

	fn is_retired(&self) -> bool {
		self.retired.load(Ordering::Acquire)
	}

	pub fn is_registered(&self) -> bool {
		self.added_order().is_some()
	}

	pub fn sources(&self) -> RwLockReadGuard<'_, Vec<Box<dyn ClassSource>>> {
		self.sources.read()
	}

	pub(crate) fn push_source(&self, source: Box<dyn ClassSource>) {
		self.sources.write().push(source);
		// Anything we failed to find before may be in the new source.
		self.blacklist.lock().clear();
		self.resource_blacklist.lock().clear();
	}

	pub fn cached_class(&self, name: &ClassName) -> Option<Arc<Class>> {
		self.classes.lock().get(name).cloned()
	}

	pub fn is_blacklisted(&self, name: &ClassName) -> bool {
		self.blacklist.lock().contains(name)
	}

	/// Whether a definition of `name` is in progress on the thread holding the section.
	pub fn is_defining(&self, name: &ClassName) -> bool {
		self.defining.lock().contains(name)
	}

	pub fn cached_class_count(&self) -> usize {
		self.classes.lock().len()
	}

	pub(crate) fn clear_caches(&self) {
		self.classes.lock().clear();
		self.blacklist.lock().clear();
		self.resources.lock().clear();
		self.resource_blacklist.lock().clear();
	}

	/// Loads a class the way code defined by this loader sees it.
	pub fn load_class(self: &Arc<Self>, name: &ClassName) -> LoadResult<Arc<Class>> {
		match self.repository() {
			Some(repository) if self.is_registered() => repository.load_class(name, self),
			_ => self.load_detached(name),
		}
	}

	/// Without a repository the loader can only see its own code sources.
	fn load_detached(self: &Arc<Self>, name: &ClassName) -> LoadResult<Arc<Class>> {
		let timeout = match self.repository() {
			Some(repository) => repository.config().load_timeout,
			None => RepositoryConfig::default().load_timeout,
		};
		if !self.section.try_acquire(timeout) {
			return Err(LoadError::interrupted(name));
		}

		let result = self.define_locally(name, &mut |dependency| self.load_class(dependency));
		self.section.release();
		result
	}

	pub fn get_resource(&self, path: &str) -> Option<Url> {
		match self.repository() {
			Some(repository) if self.is_registered() => repository.get_resource(path, self),
			_ => self.find_resource_locally(path),
		}
	}

	/// Resolves `name` strictly from this loader's code sources.
	///
	/// The caller must hold the load section. Misses are remembered in the negative cache; link
	/// failures are not remembered and propagate.
	pub fn define_locally(
		&self,
		name: &ClassName,
		resolver: &mut ClassResolver,
	) -> LoadResult<Arc<Class>> {
		assert!(
			self.section.is_held_by_current_thread(),
			"Defining {name} in {self} without holding its load section"
		);

		if let Some(class) = self.cached_class(name) {
			return Ok(class);
		}
		if self.is_blacklisted(name) {
			return Err(LoadError::not_found(name));
		}
		if name.is_array() {
			return self.define_array(name, resolver);
		}

		if !self.defining.lock().insert(name.clone()) {
			return Err(LoadError::structural(name, "class circularity"));
		}
		let _guard = DefiningGuard { loader: self, name };

		self.define_instance(name, resolver)
	}

	fn define_array(&self, name: &ClassName, resolver: &mut ClassResolver) -> LoadResult<Arc<Class>> {
		let component = match name.component() {
			Some(Component::Primitive(ty)) => ArrayComponent::Primitive(ty),
			// The component has to exist before the array type can.
			Some(Component::Class(component)) => ArrayComponent::Class(resolver(&component)?),
			None => return Err(LoadError::not_found(name)),
		};

		let loader = match &component {
			ArrayComponent::Class(class) => class.loader(),
			ArrayComponent::Primitive(_) => self.id,
		};
		let class = Arc::new(Class::array(name.clone(), loader, component));
		debug!("Defined array class {name} in {self}");
		Ok(self.cache_local(name, class))
	}

	fn define_instance(
		&self,
		name: &ClassName,
		resolver: &mut ClassResolver,
	) -> LoadResult<Arc<Class>> {
		let Some((data, source)) = self.read_class(name) else {
			let mut blacklist = self.blacklist.lock();
			if !self.is_retired() {
				blacklist.insert(name.clone());
			}
			return Err(LoadError::not_found(name));
		};

		let links = self
			.definer
			.link(name, &data, resolver)
			.map_err(|error| match error {
				LoadError::NotFound {
					name: missing,
					interrupted: false,
				} => LoadError::structural(name, format!("missing dependency {missing}")),
				other => other,
			})?;

		let class = Arc::new(Class::instance(name.clone(), self.id, source, data.len(), links));
		info!("Defined {name} in {self}");
		Ok(self.cache_local(name, class))
	}

	fn read_class(&self, name: &ClassName) -> Option<(Vec<u8>, Url)> {
		let guard = self.sources.read();
		for source in guard.iter() {
			match source.try_load(name) {
				Ok(Some(data)) => return Some((data, source.url().clone())),
				Ok(None) => {}
				Err(error) => warn!("Failed to read {name} from {}: {error:?}", source.url()),
			}
		}

		None
	}

	fn cache_local(&self, name: &ClassName, class: Arc<Class>) -> Arc<Class> {
		// Checked under the cache lock, so unregistering either sees the entry or prevents it.
		let mut classes = self.classes.lock();
		if self.is_retired() {
			debug!("Not caching {name} in retired {self}");
			return class;
		}
		classes.entry(name.clone()).or_insert(class).clone()
	}

	/// Looks a resource up in this loader's code sources only.
	pub fn find_resource_locally(&self, path: &str) -> Option<Url> {
		if let Some(url) = self.resources.lock().get(path) {
			return Some(url.clone());
		}
		if self.resource_blacklist.lock().contains(path) {
			return None;
		}

		for source in self.sources.read().iter() {
			match source.find_resource(path) {
				Ok(Some(url)) => {
					self.resources.lock().insert(path.to_string(), url.clone());
					return Some(url);
				}
				Ok(None) => {}
				Err(error) => warn!("Failed to look up {path} in {}: {error:?}", source.url()),
			}
		}

		self.resource_blacklist.lock().insert(path.to_string());
		None
	}
}

impl Display for Loader {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "Loader{}({})", self.id, self.url)
	}
}

/// Configures a loader before it is created. See [`Repository::loader`].
pub struct LoaderBuilder {
	id: LoaderId,
	repository: Weak<Repository>,
	source: Box<dyn ClassSource>,
	definer: Arc<dyn ClassDefiner>,
	original_url: Option<Url>,
}

impl LoaderBuilder {
	pub(crate) fn new(
		id: LoaderId,
		repository: Weak<Repository>,
		source: Box<dyn ClassSource>,
		definer: Arc<dyn ClassDefiner>,
	) -> LoaderBuilder {
		LoaderBuilder {
			id,
			repository,
			source,
			definer,
			original_url: None,
		}
	}

	pub fn definer(mut self, definer: Arc<dyn ClassDefiner>) -> Self {
		self.definer = definer;
		self
	}

	pub fn original_url(mut self, url: Url) -> Self {
		self.original_url = Some(url);
		self
	}

	pub fn build(self) -> Arc<Loader> {
		Arc::new(Loader::new(
			self.id,
			self.repository,
			self.source,
			self.definer,
			self.original_url,
		))
	}
}
