//! Bumper asset discovery.

use std::collections::BTreeMap;
use std::path::Path;

use clipstitch_common::{AssetsConfig, StitchError, StitchResult, TRANSITIONS_DIR_ENV};
use clipstitch_model::{Asset, AssetKind, AssetPool};

/// Build the asset pool from the configured names under `dir`.
///
/// The static asset is mandatory; its absence is a configuration error.
/// Missing intros, outros and transitions are skipped with a warning.
pub fn discover_pool(
    dir: &Path,
    assets: &AssetsConfig,
    weights: &BTreeMap<String, f64>,
) -> StitchResult<AssetPool> {
    let static_path = dir.join(&assets.static_asset);
    if !static_path.is_file() {
        return Err(StitchError::configuration(format!(
            "static asset {} not found; place it in the transitions directory or set {}",
            static_path.display(),
            TRANSITIONS_DIR_ENV
        )));
    }

    let collect = |names: &[String], kind: AssetKind| -> Vec<Asset> {
        names
            .iter()
            .filter_map(|name| {
                let path = dir.join(name);
                if path.is_file() {
                    let weight = weights.get(name).copied().unwrap_or(1.0);
                    Some(Asset::discovered(name.clone(), kind, path).with_weight(weight))
                } else {
                    tracing::warn!(asset = %name, %kind, "Missing asset file; skipping");
                    None
                }
            })
            .collect()
    };

    let pool = AssetPool {
        static_asset: Some(Asset::discovered(
            assets.static_asset.clone(),
            AssetKind::Static,
            static_path,
        )),
        intros: collect(&assets.intro, AssetKind::Intro),
        outros: collect(&assets.outro, AssetKind::Outro),
        transitions: collect(&assets.transitions, AssetKind::Transition),
    };
    tracing::info!(
        dir = %dir.display(),
        intros = pool.intros.len(),
        outros = pool.outros.len(),
        transitions = pool.transitions.len(),
        "Asset pool discovered"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AssetsConfig {
        AssetsConfig {
            static_asset: "static.mp4".into(),
            intro: vec!["intro.mp4".into()],
            outro: vec!["outro.mp4".into(), "gone.mp4".into()],
            transitions: vec!["t1.mp4".into()],
        }
    }

    #[test]
    fn test_missing_static_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_pool(dir.path(), &config(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, StitchError::Configuration { .. }));
        assert!(err.to_string().contains(TRANSITIONS_DIR_ENV));
    }

    #[test]
    fn test_missing_optional_assets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["static.mp4", "intro.mp4", "outro.mp4", "t1.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let weights = BTreeMap::from([("t1.mp4".to_string(), 3.0)]);
        let pool = discover_pool(dir.path(), &config(), &weights).unwrap();
        assert_eq!(pool.intros.len(), 1);
        assert_eq!(pool.outros.len(), 1);
        assert_eq!(pool.transitions[0].weight, 3.0);
        assert!(!pool.is_normalized());
    }
}
