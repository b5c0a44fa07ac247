use strata_base::{ResourceKind, ResourcePathHint, ResourceUuid, StrataResult};
use strata_db::{MappedRegionMut, ResourceDatabase};

/// Decoder names can hold anything; keep them to a single path component
pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Generates a resource of `size_bytes` and fills it with `write`. If anything fails after the
/// resource was generated, it is queued for removal.
pub(crate) fn write_resource<F>(
    db: &ResourceDatabase,
    resource_kind: ResourceKind,
    path_hint: &ResourcePathHint,
    size_bytes: usize,
    write: F,
) -> StrataResult<ResourceUuid>
where
    F: FnOnce(ResourceUuid, MappedRegionMut) -> StrataResult<MappedRegionMut>,
{
    let (uuid, region) = db.generate_resource(resource_kind, path_hint, size_bytes)?;
    let written = write(uuid, region).and_then(|region| region.flush());
    if let Err(e) = written {
        log::warn!(
            "Failed writing {} resource {} ({:?}), discarding it: {}",
            resource_kind,
            uuid,
            path_hint.name,
            e
        );
        db.remove_resource_later(uuid);
        return Err(e);
    }

    Ok(uuid)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_stay_in_one_directory() {
        assert_eq!(sanitize_name("Body/Head:01"), "Body_Head_01");
        assert_eq!(sanitize_name("..\\up"), "_up");
        assert_eq!(sanitize_name("rock"), "rock");
    }
}
