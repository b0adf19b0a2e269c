use crate::LoaderId;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use ucl_core::{ClassName, LoadResult, PrimitiveType};
use ucl_source::Url;

/// Resolves a class a definition links against, going through the same load protocol as any
/// other load.
pub type ClassResolver<'a> = dyn FnMut(&ClassName) -> LoadResult<Arc<Class>> + 'a;

/// Turns the bytes of a class into a linked class.
///
/// The byte format is up to the definer. Every class it depends on has to be resolved through
/// `resolver` while linking; a dependency that cannot be found makes the definition fail.
pub trait ClassDefiner: Send + Sync {
	fn link(
		&self,
		name: &ClassName,
		data: &[u8],
		resolver: &mut ClassResolver,
	) -> LoadResult<Vec<Arc<Class>>>;
}

/// Treats class bytes as opaque: nothing to link against.
pub struct OpaqueDefiner;

impl ClassDefiner for OpaqueDefiner {
	fn link(
		&self,
		_name: &ClassName,
		_data: &[u8],
		_resolver: &mut ClassResolver,
	) -> LoadResult<Vec<Arc<Class>>> {
		Ok(vec![])
	}
}

pub enum ClassKind {
	Instance { size: usize },
	Array(ArrayComponent),
}

pub enum ArrayComponent {
	Primitive(PrimitiveType),
	Class(Arc<Class>),
}

/// A defined class. Identity is the `Arc`: two loads of one name yield the same allocation.
pub struct Class {
	name: ClassName,
	loader: LoaderId,
	source: Option<Url>,
	kind: ClassKind,
	links: Vec<Arc<Class>>,
}

impl Class {
	pub fn instance(
		name: ClassName,
		loader: LoaderId,
		source: Url,
		size: usize,
		links: Vec<Arc<Class>>,
	) -> Class {
		Class {
			name,
			loader,
			source: Some(source),
			kind: ClassKind::Instance { size },
			links,
		}
	}

	pub fn array(name: ClassName, loader: LoaderId, component: ArrayComponent) -> Class {
		Class {
			name,
			loader,
			source: None,
			kind: ClassKind::Array(component),
			links: vec![],
		}
	}

	pub fn name(&self) -> &ClassName {
		&self.name
	}

	/// The loader that defined the class.
	pub fn loader(&self) -> LoaderId {
		self.loader
	}

	/// The code source the bytes came from, `None` for arrays.
	pub fn source(&self) -> Option<&Url> {
		self.source.as_ref()
	}

	pub fn kind(&self) -> &ClassKind {
		&self.kind
	}

	pub fn links(&self) -> &[Arc<Class>] {
		&self.links
	}

	pub fn component(&self) -> Option<&ArrayComponent> {
		match &self.kind {
			ClassKind::Array(component) => Some(component),
			ClassKind::Instance { .. } => None,
		}
	}
}

impl Debug for Class {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let links: Vec<&ClassName> = self.links.iter().map(|v| v.name()).collect();
		f.debug_struct("Class")
			.field("name", &self.name)
			.field("loader", &self.loader)
			.field("source", &self.source.as_ref().map(|v| v.as_str()))
			.field("links", &links)
			.finish()
	}
}
