use crate::ClassName;
use thiserror::Error;

pub type LoadResult<V> = Result<V, LoadError>;

/// Failures surfaced by a class load.
///
/// Duplicate definitions are not represented here: the first cached class wins and the conflict is
/// only logged. Contract violations such as releasing a load section that is not held panic.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoadError {
	/// No loader could define the class. Also produced when a wait inside the load protocol was
	/// interrupted or timed out, in which case `interrupted` is set.
	#[error("class {name} not found{}", interrupted_suffix(.interrupted))]
	NotFound { name: ClassName, interrupted: bool },
	/// Linking or verifying the class failed. Never retried, never cached.
	#[error("failed to link {name}: {reason}")]
	Structural { name: ClassName, reason: String },
}

fn interrupted_suffix(interrupted: &bool) -> &'static str {
	if *interrupted {
		" (interrupted)"
	} else {
		""
	}
}

impl LoadError {
	pub fn not_found(name: &ClassName) -> LoadError {
		LoadError::NotFound {
			name: name.clone(),
			interrupted: false,
		}
	}

	pub fn interrupted(name: &ClassName) -> LoadError {
		LoadError::NotFound {
			name: name.clone(),
			interrupted: true,
		}
	}

	pub fn structural(name: &ClassName, reason: impl ToString) -> LoadError {
		LoadError::Structural {
			name: name.clone(),
			reason: reason.to_string(),
		}
	}

	pub fn name(&self) -> &ClassName {
		match self {
			LoadError::NotFound { name, .. } | LoadError::Structural { name, .. } => name,
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, LoadError::NotFound { .. })
	}

	pub fn is_interrupted(&self) -> bool {
		matches!(
			self,
			LoadError::NotFound {
				interrupted: true,
				..
			}
		)
	}

	pub fn is_structural(&self) -> bool {
		matches!(self, LoadError::Structural { .. })
	}
}
