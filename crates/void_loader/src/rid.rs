//! Runtime identifier (RID) fallback selection
//!
//! Asset groups are keyed by RID. Selection is positional: the target RID,
//! then each fallback in declared order, then the RID-agnostic group.

use crate::manifest::AssetGroup;

/// RID used for the RID-agnostic asset group
pub const ANY_RID: &str = "any";

/// Select the asset paths that best match `target_rid`
///
/// The first positional match wins; there is no scoring. When neither the
/// target nor any fallback has a group, the RID-agnostic group is returned,
/// or an empty slice if the library has none.
pub fn select_asset_group<'a>(groups: &'a [AssetGroup], target_rid: &str, fallbacks: &[String]) -> &'a [String] {
    let candidates = std::iter::once(target_rid).chain(fallbacks.iter().map(String::as_str));

    for rid in candidates {
        if let Some(group) = groups.iter().find(|g| g.runtime.as_deref() == Some(rid)) {
            return &group.paths;
        }
    }

    default_assets(groups)
}

/// The RID-agnostic group of `groups`
///
/// A group without a runtime and a group explicitly tagged `any` are both
/// RID-agnostic; the untagged one is preferred.
pub fn default_assets(groups: &[AssetGroup]) -> &[String] {
    groups
        .iter()
        .find(|g| g.runtime.is_none())
        .or_else(|| groups.iter().find(|g| g.runtime.as_deref() == Some(ANY_RID)))
        .map(|g| g.paths.as_slice())
        .unwrap_or(&[])
}

/// RID of the running platform, e.g. `linux-x64`
pub fn current_rid() -> String {
    let os = match std::env::consts::OS {
        "windows" => "win",
        "macos" => "osx",
        other => other,
    };
    match arch_suffix() {
        Some(arch) => format!("{}-{}", os, arch),
        None => os.to_string(),
    }
}

/// Coarse RID used when the manifest's graph has no entry for [`current_rid`]
pub fn fallback_rid() -> String {
    let base = match std::env::consts::OS {
        "windows" => "win10",
        "linux" => "linux",
        "macos" => "osx.10.12",
        _ => return ANY_RID.to_string(),
    };
    match arch_suffix() {
        Some(arch) => format!("{}-{}", base, arch),
        None => base.to_string(),
    }
}

/// Architecture name as used in RIDs and probing path templates
pub fn arch_suffix() -> Option<&'static str> {
    match std::env::consts::ARCH {
        "x86" => Some("x86"),
        "x86_64" => Some("x64"),
        "arm" => Some("arm"),
        "aarch64" => Some("arm64"),
        _ => None,
    }
}
