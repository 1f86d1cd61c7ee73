//! Environment constraint evaluation.
//!
//! A package is eligible only when every one of its constraints holds. All
//! constraints are evaluated so the caller sees every violation at once.

use pallet_schema::{Constraint, Environment, PlatformName, VersionRange};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Where a package instance lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Scope {
    Cluster,
    Namespace(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Cluster => write!(f, "cluster"),
            Scope::Namespace(ns) => write!(f, "namespace '{ns}'"),
        }
    }
}

/// A package instance, ordered by `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InstanceRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl InstanceRef {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn scope(&self) -> Scope {
        match &self.namespace {
            Some(ns) => Scope::Namespace(ns.clone()),
            None => Scope::Cluster,
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An instance of a package seen in a scope. `active` instances are already
/// installed; the others are pending install requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ScopeMember {
    pub instance: InstanceRef,
    pub active: bool,
}

impl ScopeMember {
    pub fn active(instance: InstanceRef) -> Self {
        Self {
            instance,
            active: true,
        }
    }

    pub fn pending(instance: InstanceRef) -> Self {
        Self {
            instance,
            active: false,
        }
    }
}

/// Reports which instances of a package occupy a scope.
///
/// Implementations return every instance that exists or has been requested.
pub trait ScopeMembership {
    fn instances(&self, package: &str, scope: &Scope) -> Vec<ScopeMember>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum Violation {
    #[error("{platform} version {version} does not satisfy '{range}'")]
    PlatformVersion {
        platform: PlatformName,
        version: String,
        range: String,
    },
    #[error("{platform} version '{version}' cannot be parsed")]
    UnparsablePlatformVersion {
        platform: PlatformName,
        version: String,
    },
    #[error("platform {platform} is not one of {allowed:?}")]
    Platform {
        platform: PlatformName,
        allowed: Vec<PlatformName>,
    },
    #[error("package '{package}' is already installed in {scope} as '{holder}'")]
    UniqueInScope {
        package: String,
        scope: Scope,
        holder: InstanceRef,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub violations: Vec<Violation>,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct ConstraintEvaluator<'a> {
    environment: &'a Environment,
    membership: &'a dyn ScopeMembership,
}

impl<'a> ConstraintEvaluator<'a> {
    pub fn new(environment: &'a Environment, membership: &'a dyn ScopeMembership) -> Self {
        Self {
            environment,
            membership,
        }
    }

    /// Evaluate all constraints for one instance of `package`.
    pub fn evaluate(
        &self,
        constraints: &[Constraint],
        package: &str,
        instance: &InstanceRef,
    ) -> Eligibility {
        let mut violations = Vec::new();
        for constraint in constraints {
            let result = match constraint {
                Constraint::UniqueInScope => self.check_unique(package, instance),
                other => check_platform(self.environment, other),
            };
            if let Err(v) = result {
                debug!("constraint violated for {instance}: {v}");
                violations.push(v);
            }
        }
        Eligibility { violations }
    }

    /// Any other active instance holds the scope. Pending requests never
    /// displace an active one; among pending requests the first in
    /// `(namespace, name)` order holds it, so simultaneous requests settle the
    /// same way on every pass.
    fn check_unique(&self, package: &str, instance: &InstanceRef) -> Result<(), Violation> {
        let scope = instance.scope();
        let (this, others): (Vec<ScopeMember>, Vec<ScopeMember>) = self
            .membership
            .instances(package, &scope)
            .into_iter()
            .partition(|member| member.instance == *instance);
        let self_active = this.iter().any(|member| member.active);
        let (active, pending): (Vec<ScopeMember>, Vec<ScopeMember>) =
            others.into_iter().partition(|other| other.active);

        let holder = match active.into_iter().map(|m| m.instance).min() {
            Some(holder) => Some(holder),
            None if self_active => None,
            None => pending
                .into_iter()
                .map(|m| m.instance)
                .min()
                .filter(|holder| holder < instance),
        };
        match holder {
            Some(holder) => Err(Violation::UniqueInScope {
                package: package.to_owned(),
                scope,
                holder,
            }),
            None => Ok(()),
        }
    }
}

/// Evaluate only the environment-dependent constraints, treating
/// `UniqueInScope` as satisfied. Used to filter repository entries during
/// resolution, where no instance exists yet.
pub fn evaluate_platform(constraints: &[Constraint], environment: &Environment) -> Eligibility {
    Eligibility {
        violations: constraints
            .iter()
            .filter_map(|c| check_platform(environment, c).err())
            .collect(),
    }
}

fn check_platform(environment: &Environment, constraint: &Constraint) -> Result<(), Violation> {
    match constraint {
        Constraint::PlatformVersion { name, range } => {
            check_platform_version(environment, *name, range)
        }
        Constraint::Platform(allowed) => {
            if environment
                .platforms()
                .iter()
                .any(|p| allowed.contains(&p.name))
            {
                Ok(())
            } else {
                Err(Violation::Platform {
                    platform: environment.primary_platform().name,
                    allowed: allowed.clone(),
                })
            }
        }
        Constraint::UniqueInScope => Ok(()),
    }
}

fn check_platform_version(
    environment: &Environment,
    name: PlatformName,
    range: &VersionRange,
) -> Result<(), Violation> {
    let Some(platform) = environment.platform(name) else {
        // Constraint targets a platform this environment does not run.
        return Ok(());
    };
    let version = platform
        .parsed_version()
        .map_err(|_| Violation::UnparsablePlatformVersion {
            platform: name,
            version: platform.version.clone(),
        })?;
    if range.matches(&version) {
        Ok(())
    } else {
        Err(Violation::PlatformVersion {
            platform: name,
            version: platform.version.clone(),
            range: range.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Members(Vec<ScopeMember>);

    impl Members {
        fn pending(instances: Vec<InstanceRef>) -> Self {
            Self(instances.into_iter().map(ScopeMember::pending).collect())
        }
    }

    impl ScopeMembership for Members {
        fn instances(&self, _package: &str, scope: &Scope) -> Vec<ScopeMember> {
            self.0
                .iter()
                .filter(|m| m.instance.scope() == *scope)
                .cloned()
                .collect()
        }
    }

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn platform_version_vacuous_on_other_platform() {
        let env = Environment::kubernetes("1.29.0");
        let none = Members(vec![]);
        let eval = ConstraintEvaluator::new(&env, &none);
        let constraints = [Constraint::PlatformVersion {
            name: PlatformName::OpenShift,
            range: range(">=4.14"),
        }];
        assert!(eval
            .evaluate(&constraints, "shop.core", &InstanceRef::cluster("shop"))
            .is_eligible());
    }

    #[test]
    fn platform_version_checked_when_present() {
        let env = Environment::kubernetes("v1.27.3").with_openshift("4.13.2");
        let none = Members(vec![]);
        let eval = ConstraintEvaluator::new(&env, &none);
        let constraints = [
            Constraint::PlatformVersion {
                name: PlatformName::OpenShift,
                range: range(">=4.14"),
            },
            Constraint::PlatformVersion {
                name: PlatformName::Kubernetes,
                range: range("^1.27"),
            },
        ];
        let result = eval.evaluate(&constraints, "shop.core", &InstanceRef::cluster("shop"));
        assert_eq!(result.violations.len(), 1);
        assert!(matches!(
            result.violations[0],
            Violation::PlatformVersion {
                platform: PlatformName::OpenShift,
                ..
            }
        ));
    }

    #[test]
    fn unparsable_platform_version_is_a_violation() {
        let env = Environment::kubernetes("latest");
        let result = evaluate_platform(
            &[Constraint::PlatformVersion {
                name: PlatformName::Kubernetes,
                range: range("*"),
            }],
            &env,
        );
        assert!(matches!(
            result.violations[..],
            [Violation::UnparsablePlatformVersion { .. }]
        ));
    }

    #[test]
    fn platform_list_matches_any_present_platform() {
        let ocp = Environment::kubernetes("1.27.0").with_openshift("4.14.0");
        let k8s = Environment::kubernetes("1.29.0");
        let only_ocp = [Constraint::Platform(vec![PlatformName::OpenShift])];
        let only_k8s = [Constraint::Platform(vec![PlatformName::Kubernetes])];

        assert!(evaluate_platform(&only_ocp, &ocp).is_eligible());
        assert!(evaluate_platform(&only_k8s, &ocp).is_eligible());
        let result = evaluate_platform(&only_ocp, &k8s);
        assert!(matches!(
            result.violations[..],
            [Violation::Platform {
                platform: PlatformName::Kubernetes,
                ..
            }]
        ));
    }

    #[test]
    fn all_violations_are_collected() {
        let env = Environment::kubernetes("1.25.0");
        let none = Members(vec![]);
        let eval = ConstraintEvaluator::new(&env, &none);
        let constraints = [
            Constraint::Platform(vec![PlatformName::OpenShift]),
            Constraint::PlatformVersion {
                name: PlatformName::Kubernetes,
                range: range(">=1.27"),
            },
        ];
        let result = eval.evaluate(&constraints, "shop.core", &InstanceRef::cluster("shop"));
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn unique_in_scope_first_instance_wins() {
        let env = Environment::kubernetes("1.29.0");
        let a = InstanceRef::namespaced("team", "a");
        let b = InstanceRef::namespaced("team", "b");
        let elsewhere = InstanceRef::namespaced("other", "a");
        let members = Members::pending(vec![b.clone(), a.clone(), elsewhere.clone()]);
        let eval = ConstraintEvaluator::new(&env, &members);
        let unique = [Constraint::UniqueInScope];

        assert!(eval.evaluate(&unique, "shop.core", &a).is_eligible());
        assert!(eval.evaluate(&unique, "shop.core", &elsewhere).is_eligible());
        let result = eval.evaluate(&unique, "shop.core", &b);
        assert_eq!(
            result.violations,
            vec![Violation::UniqueInScope {
                package: "shop.core".to_owned(),
                scope: Scope::Namespace("team".to_owned()),
                holder: a,
            }]
        );
    }

    #[test]
    fn unique_in_scope_active_holder_keeps_scope() {
        let env = Environment::kubernetes("1.29.0");
        let zeta = InstanceRef::namespaced("team", "zeta");
        let alpha = InstanceRef::namespaced("team", "alpha");
        let members = Members(vec![
            ScopeMember::active(zeta.clone()),
            ScopeMember::pending(alpha.clone()),
        ]);
        let eval = ConstraintEvaluator::new(&env, &members);
        let unique = [Constraint::UniqueInScope];

        assert!(eval.evaluate(&unique, "shop.core", &zeta).is_eligible());
        let result = eval.evaluate(&unique, "shop.core", &alpha);
        assert_eq!(
            result.violations,
            vec![Violation::UniqueInScope {
                package: "shop.core".to_owned(),
                scope: Scope::Namespace("team".to_owned()),
                holder: zeta,
            }]
        );
    }

    #[test]
    fn unique_in_scope_two_active_instances_conflict() {
        let env = Environment::kubernetes("1.29.0");
        let a = InstanceRef::cluster("a");
        let b = InstanceRef::cluster("b");
        let members = Members(vec![
            ScopeMember::active(a.clone()),
            ScopeMember::active(b.clone()),
        ]);
        let eval = ConstraintEvaluator::new(&env, &members);
        let unique = [Constraint::UniqueInScope];
        assert!(!eval.evaluate(&unique, "shop.core", &a).is_eligible());
        assert!(!eval.evaluate(&unique, "shop.core", &b).is_eligible());
    }

    #[test]
    fn unique_in_scope_alone_is_eligible() {
        let env = Environment::kubernetes("1.29.0");
        let me = InstanceRef::cluster("shop");
        let members = Members::pending(vec![me.clone()]);
        let eval = ConstraintEvaluator::new(&env, &members);
        assert!(eval
            .evaluate(&[Constraint::UniqueInScope], "shop.core", &me)
            .is_eligible());
    }

    #[test]
    fn evaluate_platform_ignores_unique_in_scope() {
        let env = Environment::kubernetes("1.29.0");
        assert!(evaluate_platform(&[Constraint::UniqueInScope], &env).is_eligible());
    }
}
