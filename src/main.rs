use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use eyre::{bail, Context};
use tracing::{info, warn};

use ucl_core::{ClassName, RepositoryConfig};
use ucl_repository::{Loader, Repository};
use ucl_source::{DirectoryClassSource, JarClassSource};

#[derive(Parser, Debug)]
#[command(name = "ucl")]
#[command(about = "Loads classes through a shared class loader repository")]
#[command(version)]
struct Cli {
	/// Repository properties file
	#[arg(long)]
	config: Option<PathBuf>,
	/// Directory or jar to register as a loader, in lookup order
	#[arg(long = "source", required = true)]
	sources: Vec<PathBuf>,
	/// Binary class names to load through the first loader
	#[arg(long = "load", required = true)]
	names: Vec<String>,
	#[arg(long, default_value_t = 1)]
	threads: usize,
}

fn main() -> eyre::Result<()> {
	ucl_core::init();
	let cli = Cli::parse();

	let config = match &cli.config {
		Some(path) => {
			let blob = std::fs::read_to_string(path)
				.wrap_err_with(|| format!("Failed to read {}", path.display()))?;
			RepositoryConfig::parse(&blob)?
		}
		None => RepositoryConfig::default(),
	};

	let repository = Repository::new(config);
	let mut loaders = Vec::new();
	for path in &cli.sources {
		loaders.push(add_source(&repository, path)?);
	}
	let Some(requesting) = loaders.first() else {
		bail!("No sources given");
	};

	let mut names = Vec::new();
	for name in &cli.names {
		match ClassName::parse(name) {
			Some(name) => names.push(name),
			None => bail!("Invalid class name {name}"),
		}
	}

	load_all(requesting, &names, cli.threads.max(1));
	for name in &names {
		println!("{}", repository.display_class_info(name));
	}

	let stats = repository.scheduler().stats();
	info!(
		"Scheduled {} subtasks, executed {}, reassigned {}",
		stats.scheduled, stats.executed, stats.reassigned
	);
	Ok(())
}

fn add_source(repository: &Repository, path: &Path) -> eyre::Result<Arc<Loader>> {
	if path.is_dir() {
		return repository.add_loader(DirectoryClassSource::new(path)?);
	}

	match path.extension().and_then(|v| v.to_str()) {
		Some("jar" | "zip") => repository.add_loader(JarClassSource::open(path)?),
		_ => bail!("{} is neither a directory nor a jar", path.display()),
	}
}

fn load_all(requesting: &Arc<Loader>, names: &[ClassName], threads: usize) {
	let load = |name: &ClassName| match requesting.load_class(name) {
		Ok(class) => info!("Loaded {name} from Loader{}", class.loader()),
		Err(error) => warn!("{error}"),
	};

	let chunk = names.len().div_ceil(threads).max(1);
	let result = crossbeam::scope(|scope| {
		for names in names.chunks(chunk) {
			scope.spawn(move |_| names.iter().for_each(load));
		}
	});

	if result.is_err() {
		warn!("A loading thread panicked");
	}
}
