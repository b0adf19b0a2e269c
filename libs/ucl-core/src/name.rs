use std::borrow::Borrow;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A binary class name as handed to a loader.
///
/// Plain classes use the dotted form (`com.acme.a.Foo`), arrays use descriptor form
/// (`[Lcom.acme.a.Foo;`, `[[I`). Cloning is cheap.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ClassName(Arc<str>);

impl ClassName {
	/// Creates a name without validating it. See [`ClassName::parse`].
	pub fn new(name: impl AsRef<str>) -> ClassName {
		ClassName(Arc::from(name.as_ref()))
	}

	pub fn parse(name: &str) -> Option<ClassName> {
		if name.starts_with('[') {
			let dims = name.bytes().take_while(|v| *v == b'[').count();
			let element = &name[dims..];
			let valid = match element.as_bytes().first()? {
				b'L' => element.ends_with(';') && is_plain_name(&element[1..element.len() - 1]),
				_ => element.len() == 1 && PrimitiveType::parse(element.as_bytes()[0]).is_some(),
			};
			return valid.then(|| ClassName::new(name));
		}

		is_plain_name(name).then(|| ClassName::new(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_array(&self) -> bool {
		self.0.starts_with('[')
	}

	/// Number of array dimensions, zero for plain classes.
	pub fn dimensions(&self) -> usize {
		self.0.bytes().take_while(|v| *v == b'[').count()
	}

	/// The component type of an array one dimension down.
	pub fn component(&self) -> Option<Component> {
		if !self.is_array() {
			return None;
		}

		Component::parse(&self.0[1..])
	}

	/// The innermost element type of an array.
	pub fn element(&self) -> Option<Component> {
		if !self.is_array() {
			return None;
		}

		Component::parse(&self.0[self.dimensions()..])
	}

	/// The plain class name this name is about, for arrays the innermost element class.
	/// `None` for arrays of primitives.
	pub fn element_name(&self) -> Option<&str> {
		if !self.is_array() {
			return Some(&self.0);
		}

		let element = &self.0[self.dimensions()..];
		element
			.strip_prefix('L')
			.and_then(|v| v.strip_suffix(';'))
	}

	/// The package of the (element) class. The default package and primitive arrays give `""`.
	pub fn package(&self) -> &str {
		match self.element_name() {
			Some(name) => name.rsplit_once('.').map(|(package, _)| package).unwrap_or(""),
			None => "",
		}
	}

	pub fn simple_name(&self) -> &str {
		match self.element_name() {
			Some(name) => name.rsplit_once('.').map(|(_, simple)| simple).unwrap_or(name),
			None => &self.0,
		}
	}

	/// The entry path of the class file inside a code source, `None` for arrays.
	pub fn resource_path(&self) -> Option<String> {
		if self.is_array() {
			return None;
		}

		let mut path = self.0.replace('.', "/");
		path.push_str(".class");
		Some(path)
	}

	/// Recovers a class name from a code-source entry path such as `com/acme/a/Foo.class`.
	pub fn from_resource_path(path: &str) -> Option<ClassName> {
		let stem = path.strip_suffix(".class")?;
		ClassName::parse(&stem.replace('/', "."))
	}
}

fn is_plain_name(name: &str) -> bool {
	!name.is_empty()
		&& name
			.split('.')
			.all(|part| !part.is_empty() && !part.contains(['/', ';', '[']))
}

impl Display for ClassName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl Debug for ClassName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(&*self.0, f)
	}
}

impl Borrow<str> for ClassName {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for ClassName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ClassName {
	fn from(value: &str) -> Self {
		ClassName::new(value)
	}
}

#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Component {
	Primitive(PrimitiveType),
	Class(ClassName),
}

impl Component {
	fn parse(desc: &str) -> Option<Component> {
		match desc.as_bytes().first()? {
			b'[' => Some(Component::Class(ClassName::new(desc))),
			b'L' => {
				let name = desc.strip_prefix('L')?.strip_suffix(';')?;
				Some(Component::Class(ClassName::new(name)))
			}
			byte if desc.len() == 1 => PrimitiveType::parse(*byte).map(Component::Primitive),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum PrimitiveType {
	Boolean,
	Byte,
	Short,
	Int,
	Long,
	Char,
	Float,
	Double,
}

impl PrimitiveType {
	pub fn parse(desc: u8) -> Option<PrimitiveType> {
		Some(match desc {
			b'Z' => PrimitiveType::Boolean,
			b'B' => PrimitiveType::Byte,
			b'C' => PrimitiveType::Char,
			b'D' => PrimitiveType::Double,
			b'F' => PrimitiveType::Float,
			b'I' => PrimitiveType::Int,
			b'J' => PrimitiveType::Long,
			b'S' => PrimitiveType::Short,
			_ => {
				return None;
			}
		})
	}

	pub fn char(&self) -> char {
		match self {
			PrimitiveType::Boolean => 'Z',
			PrimitiveType::Byte => 'B',
			PrimitiveType::Short => 'S',
			PrimitiveType::Int => 'I',
			PrimitiveType::Long => 'J',
			PrimitiveType::Char => 'C',
			PrimitiveType::Float => 'F',
			PrimitiveType::Double => 'D',
		}
	}

	pub fn keyword(&self) -> &'static str {
		match self {
			PrimitiveType::Boolean => "boolean",
			PrimitiveType::Byte => "byte",
			PrimitiveType::Short => "short",
			PrimitiveType::Int => "int",
			PrimitiveType::Long => "long",
			PrimitiveType::Char => "char",
			PrimitiveType::Float => "float",
			PrimitiveType::Double => "double",
		}
	}
}

impl Display for PrimitiveType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.keyword())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_names() {
		let name = ClassName::parse("com.acme.a.Foo").unwrap();
		assert_eq!(name.package(), "com.acme.a");
		assert_eq!(name.simple_name(), "Foo");
		assert_eq!(name.resource_path().as_deref(), Some("com/acme/a/Foo.class"));
		assert!(!name.is_array());

		let root = ClassName::parse("Main").unwrap();
		assert_eq!(root.package(), "");

		assert!(ClassName::parse("").is_none());
		assert!(ClassName::parse("com..Foo").is_none());
		assert!(ClassName::parse("com/acme/Foo").is_none());
	}

	#[test]
	fn array_names() {
		let name = ClassName::parse("[[Lcom.acme.a.Foo;").unwrap();
		assert_eq!(name.dimensions(), 2);
		assert_eq!(
			name.component(),
			Some(Component::Class(ClassName::new("[Lcom.acme.a.Foo;")))
		);
		assert_eq!(
			name.element(),
			Some(Component::Class(ClassName::new("com.acme.a.Foo")))
		);
		assert_eq!(name.package(), "com.acme.a");
		assert_eq!(name.resource_path(), None);

		let ints = ClassName::parse("[I").unwrap();
		assert_eq!(ints.component(), Some(Component::Primitive(PrimitiveType::Int)));
		assert_eq!(ints.package(), "");

		assert!(ClassName::parse("[Q").is_none());
		assert!(ClassName::parse("[Lcom.acme.Foo").is_none());
		assert!(ClassName::parse("[II").is_none());
	}

	#[test]
	fn resource_paths() {
		assert_eq!(
			ClassName::from_resource_path("com/acme/b/Bar.class"),
			Some(ClassName::new("com.acme.b.Bar"))
		);
		assert_eq!(ClassName::from_resource_path("com/acme/b/bar.txt"), None);
	}
}
