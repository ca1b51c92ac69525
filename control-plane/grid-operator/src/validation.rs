use crate::crd::{ExposeExternallyType, GridClusterSpec};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "when exposeExternally.type is set to \"Unisocket\", exposeExternally.memberAccess must not be set"
    )]
    UnisocketMemberAccess,
    #[error("when an enterprise image is deployed, licenseKeySecret must be set")]
    MissingLicense,
    #[error("clusterSize must not be negative (got {0})")]
    NegativeClusterSize(i32),
}

/// Check the invariants a `GridCluster` must hold before any object is built.
pub fn validate(spec: &GridClusterSpec) -> Result<(), ValidationError> {
    validate_expose_externally(spec)?;
    validate_license(spec)?;
    validate_cluster_size(spec)?;
    Ok(())
}

fn validate_expose_externally(
    spec: &GridClusterSpec,
) -> Result<(), ValidationError> {
    match spec.expose_externally.as_ref() {
        Some(ee)
            if ee.type_ == ExposeExternallyType::Unisocket
                && ee.member_access.is_some() =>
        {
            Err(ValidationError::UnisocketMemberAccess)
        }
        _ => Ok(()),
    }
}

fn validate_license(spec: &GridClusterSpec) -> Result<(), ValidationError> {
    if is_enterprise(&spec.repository) && spec.license_secret().is_none() {
        return Err(ValidationError::MissingLicense);
    }
    Ok(())
}

fn validate_cluster_size(spec: &GridClusterSpec) -> Result<(), ValidationError> {
    if spec.cluster_size < 0 {
        return Err(ValidationError::NegativeClusterSize(spec.cluster_size));
    }
    Ok(())
}

/// Enterprise images are published under repositories whose last path
/// segment ends with `-enterprise` (e.g. `hazelcast/hazelcast-enterprise`).
pub fn is_enterprise(repository: &str) -> bool {
    repository
        .rsplit('/')
        .next()
        .map(|last| last.ends_with("-enterprise"))
        .unwrap_or(false)
}
