use eyre::{bail, eyre, Context};
use nom::bytes::complete::take_till1;
use nom::character::complete::{not_line_ending, one_of, space0};
use nom::combinator::{all_consuming, value};
use nom::sequence::{preceded, separated_pair, tuple};
use nom::IResult;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A flat `key=value` property blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
	entries: BTreeMap<String, String>,
}

fn key(input: &str) -> IResult<&str, &str> {
	take_till1(|c: char| c == '=' || c == ':' || c.is_whitespace())(input)
}

fn separator(input: &str) -> IResult<&str, ()> {
	value((), tuple((space0, one_of("=:"), space0)))(input)
}

fn entry(input: &str) -> IResult<&str, (&str, &str)> {
	preceded(space0, separated_pair(key, separator, not_line_ending))(input)
}

impl Properties {
	pub fn parse(blob: &str) -> eyre::Result<Properties> {
		let mut entries = BTreeMap::new();
		for (line_no, line) in blob.lines().enumerate() {
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
				continue;
			}

			let (_, (key, value)) = all_consuming(entry)(trimmed)
				.map_err(|_| eyre!("line {}: malformed property {trimmed:?}", line_no + 1))?;
			entries.insert(key.to_string(), value.trim().to_string());
		}

		Ok(Properties { entries })
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries.get(key).map(|v| v.as_str())
	}

	pub fn set(&mut self, key: impl ToString, value: impl ToString) {
		self.entries.insert(key.to_string(), value.to_string());
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn get_parsed<V: FromStr>(&self, key: &str) -> eyre::Result<Option<V>>
	where
		V::Err: std::error::Error + Send + Sync + 'static,
	{
		self.get(key)
			.map(|v| v.parse::<V>())
			.transpose()
			.wrap_err_with(|| format!("Invalid value for {key}"))
	}

	pub fn get_bool(&self, key: &str) -> eyre::Result<Option<bool>> {
		let Some(value) = self.get(key) else {
			return Ok(None);
		};

		Ok(Some(match value.to_ascii_lowercase().as_str() {
			"true" | "yes" | "on" | "1" => true,
			"false" | "no" | "off" | "0" => false,
			_ => bail!("Invalid boolean for {key}: {value:?}"),
		}))
	}
}

/// How ownership of a loader's load section is synchronized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionStrategy {
	/// Definition work is handed to the thread owning the loader.
	Cooperative,
	/// The calling thread takes each loader's section itself, bounded by the load timeout.
	Exclusive,
}

impl FromStr for SectionStrategy {
	type Err = eyre::Report;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"cooperative" => Ok(SectionStrategy::Cooperative),
			"exclusive" => Ok(SectionStrategy::Exclusive),
			_ => bail!("Unknown loader strategy {s:?}"),
		}
	}
}

/// Which package candidates a load request tries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidatePolicy {
	/// Only the lowest-order candidate.
	First,
	/// Candidates in order until one defines the class.
	Failover,
}

impl FromStr for CandidatePolicy {
	type Err = eyre::Report;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"first" => Ok(CandidatePolicy::First),
			"failover" => Ok(CandidatePolicy::Failover),
			_ => bail!("Unknown candidate policy {s:?}"),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryConfig {
	pub parent_first: bool,
	pub candidates: CandidatePolicy,
	pub strategy: SectionStrategy,
	/// Upper bound on the time a single load call spends waiting.
	pub load_timeout: Duration,
	/// Slice of a wait for a loader's owner to register itself.
	pub owner_wait: Duration,
}

impl Default for RepositoryConfig {
	fn default() -> Self {
		RepositoryConfig {
			parent_first: true,
			candidates: CandidatePolicy::Failover,
			strategy: SectionStrategy::Cooperative,
			load_timeout: Duration::from_secs(30),
			owner_wait: Duration::from_secs(1),
		}
	}
}

impl RepositoryConfig {
	pub const PARENT_FIRST: &'static str = "repository.parent-first";
	pub const CANDIDATES: &'static str = "repository.candidates";
	pub const STRATEGY: &'static str = "loader.strategy";
	pub const TIMEOUT_MS: &'static str = "scheduler.timeout-ms";
	pub const OWNER_WAIT_MS: &'static str = "scheduler.owner-wait-ms";

	pub fn parse(blob: &str) -> eyre::Result<RepositoryConfig> {
		let properties = Properties::parse(blob).wrap_err("Failed to parse repository properties")?;
		Self::from_properties(&properties)
	}

	pub fn from_properties(properties: &Properties) -> eyre::Result<RepositoryConfig> {
		let mut config = RepositoryConfig::default();
		for (key, value) in properties.iter() {
			match key {
				Self::PARENT_FIRST | Self::CANDIDATES | Self::STRATEGY | Self::TIMEOUT_MS
				| Self::OWNER_WAIT_MS => {}
				_ => debug!("Ignoring unknown repository property {key}={value}"),
			}
		}

		if let Some(value) = properties.get_bool(Self::PARENT_FIRST)? {
			config.parent_first = value;
		}
		if let Some(value) = properties.get(Self::CANDIDATES) {
			config.candidates = value.parse()?;
		}
		if let Some(value) = properties.get(Self::STRATEGY) {
			config.strategy = value.parse()?;
		}
		if let Some(ms) = properties.get_parsed::<u64>(Self::TIMEOUT_MS)? {
			config.load_timeout = Duration::from_millis(ms);
		}
		if let Some(ms) = properties.get_parsed::<u64>(Self::OWNER_WAIT_MS)? {
			config.owner_wait = Duration::from_millis(ms.max(1));
		}

		Ok(config)
	}
}
