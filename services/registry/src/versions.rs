//! Semantic version ordering for version listings.

use semver::Version;

/// Parse a version as listed by the registry, tolerating a leading `v`.
pub(crate) fn parse(version: &str) -> Result<Version, semver::Error> {
    Version::parse(version.strip_prefix('v').unwrap_or(version))
}

/// Pair each item with its parsed version and sort ascending.
///
/// Items whose version does not parse are dropped with a log line. The sort
/// is stable, so equal versions keep their input order.
pub(crate) fn sort_by_version<T>(items: Vec<T>, version_of: impl Fn(&T) -> &str) -> Vec<T> {
    let mut parsed: Vec<(Version, T)> = items
        .into_iter()
        .filter_map(|item| match parse(version_of(&item)) {
            Ok(version) => Some((version, item)),
            Err(error) => {
                tracing::warn!(version = version_of(&item), %error, "Ignoring invalid version");
                None
            }
        })
        .collect();

    parsed.sort_by(|(a, _), (b, _)| a.cmp(b));
    parsed.into_iter().map(|(_, item)| item).collect()
}

/// Sort version strings ascending by semantic version, dropping invalid ones.
pub fn sort_versions<I, S>(versions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sort_by_version(versions.into_iter().map(Into::into).collect(), |version| {
        version.as_str()
    })
}
