use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts the changes the reconciler applies to access lists.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    grants: Counter,
    revocations: Counter,
    errors: Family<ErrorLabels, Counter>,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub(crate) enum Op {
    List,
    Create,
    Delete,
    Members,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    op: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let grants = Counter::default();
        reg.register(
            "access_grants",
            "Total number of access entries created",
            grants.clone(),
        );

        let revocations = Counter::default();
        reg.register(
            "access_revocations",
            "Total number of access entries deleted",
            revocations.clone(),
        );

        let errors = Family::<ErrorLabels, Counter>::default();
        reg.register(
            "access_errors",
            "Total number of failed calls to the access store or the cluster API",
            errors.clone(),
        );

        Self {
            grants,
            revocations,
            errors,
        }
    }

    pub(crate) fn granted(&self) {
        self.grants.inc();
    }

    pub(crate) fn revoked(&self) {
        self.revocations.inc();
    }

    pub(crate) fn failed(&self, op: Op) {
        self.errors.get_or_create(&ErrorLabels { op: op.as_str() }).inc();
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> (u64, u64) {
        (self.grants.get(), self.revocations.get())
    }
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Members => "members",
        }
    }
}
