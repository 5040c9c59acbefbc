//! Platform resolution for dependency edges.
//!
//! A dependent built for `(B, H, T)` hands each dependency a triple derived
//! from its own, according to the edge's [`DependencyKind`]:
//!
//! | kind | dependency triple |
//! |---|---|
//! | build->build | (B, B, B) |
//! | build->host | (B, B, H) |
//! | build->target | (B, B, T) |
//! | host->host | (B, H, H) |
//! | host->target | (B, H, T) |
//! | target->target | (B, T, T) |

use stash_types::{DependencyKind, PlatformTriple};

use crate::error::GenResult;

/// The triple a dependency of `kind` is generated for.
pub fn resolve_platforms(platforms: &PlatformTriple, kind: DependencyKind) -> PlatformTriple {
    let PlatformTriple {
        build: b,
        host: h,
        target: t,
    } = platforms;
    let (host, target) = match kind {
        DependencyKind::BuildBuild => (b, b),
        DependencyKind::BuildHost => (b, h),
        DependencyKind::BuildTarget => (b, t),
        DependencyKind::HostHost => (h, h),
        DependencyKind::HostTarget => (h, t),
        DependencyKind::TargetTarget => (t, t),
    };
    PlatformTriple::new(b.clone(), host.clone(), target.clone())
}

/// Like [`resolve_platforms`] with the kind given by name.
pub fn resolve_kind(platforms: &PlatformTriple, kind: &str) -> GenResult<PlatformTriple> {
    Ok(resolve_platforms(platforms, kind.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenError;
    use stash_types::{Platform, TypeError};

    fn triple() -> PlatformTriple {
        PlatformTriple::new(
            "linux-amd64".parse().unwrap(),
            "linux-arm64".parse().unwrap(),
            "windows-386".parse().unwrap(),
        )
    }

    #[test]
    fn every_kind_resolves_per_table() {
        let p = triple();
        let (b, h, t) = (p.build.clone(), p.host.clone(), p.target.clone());
        let expected: [(DependencyKind, [&Platform; 3]); 6] = [
            (DependencyKind::BuildBuild, [&b, &b, &b]),
            (DependencyKind::BuildHost, [&b, &b, &h]),
            (DependencyKind::BuildTarget, [&b, &b, &t]),
            (DependencyKind::HostHost, [&b, &h, &h]),
            (DependencyKind::HostTarget, [&b, &h, &t]),
            (DependencyKind::TargetTarget, [&b, &t, &t]),
        ];
        for (kind, [eb, eh, et]) in expected {
            let got = resolve_platforms(&p, kind);
            assert_eq!(
                (&got.build, &got.host, &got.target),
                (eb, eh, et),
                "{kind}"
            );
        }
    }

    #[test]
    fn build_slot_is_always_inherited() {
        let p = triple();
        for kind in DependencyKind::ALL {
            assert_eq!(resolve_platforms(&p, kind).build, p.build);
        }
    }

    #[test]
    fn kinds_resolve_by_name() {
        let p = triple();
        let got = resolve_kind(&p, "host->target").unwrap();
        assert_eq!(got, resolve_platforms(&p, DependencyKind::HostTarget));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = resolve_kind(&triple(), "sideways").unwrap_err();
        assert!(matches!(
            err,
            GenError::Type(TypeError::UnknownDependencyType(_))
        ));
    }
}
