//! Drawing parameter trees from their declared distributions.
//!
//! [`draw_sample`] turns an [`EncodedTree`] into a [`SampledTree`] of the same
//! shape, consuming one split key per leaf in canonical order.
//! [`extract_multiple_models`] repeats that for several candidate models and
//! stacks the results along a leading model axis.

use shared::algo::par_map_ordered;
use thiserror::Error;

use crate::param_tree::{EncodedTree, ParamTree, SampledTree};
use crate::rng_key::RngKey;

/// Field added to multi-model draws holding `[0, 1, .., n_models - 1]`.
pub const MODEL_INDEX_FIELD: &str = "model_index";

/// Draws for several models; every leaf holds one value per model.
pub type ModelDraws = ParamTree<Vec<f64>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("model index {index} out of range for {n_models} drawn models")]
    ModelIndexOutOfRange { index: usize, n_models: usize },
    #[error("at least one model must be drawn")]
    NoModels,
}

/// Replace every record in `config` with a draw from it.
///
/// The key is split into exactly `config.num_leaves()` children and the i-th
/// leaf in canonical order is drawn with the i-th child. Calling this twice
/// with the same arguments returns identical trees.
pub fn draw_sample(config: &EncodedTree, key: RngKey) -> SampledTree {
    let keys = key.split(config.num_leaves());
    config.map_indexed(|i, record| record.draw(keys[i]))
}

/// Draw `n_models` independent parameter sets from the same configuration.
///
/// Model `m` is exactly `draw_sample(config, key.split(n_models)[m])`. Each
/// leaf of the result holds the per-model values in model order, and a
/// [`MODEL_INDEX_FIELD`] leaf is added at the top level (replacing any field
/// of that name in `config`).
pub fn extract_multiple_models(
    config: &EncodedTree,
    key: RngKey,
    n_models: usize,
) -> Result<ModelDraws, SamplerError> {
    if n_models == 0 {
        return Err(SamplerError::NoModels);
    }

    let model_keys = key.split(n_models);
    let per_model: Vec<Vec<f64>> = par_map_ordered(&model_keys, |_, model_key| {
        draw_sample(config, *model_key)
            .leaves()
            .into_iter()
            .map(|(_, value)| *value)
            .collect()
    });

    let mut draws = config.map_indexed(|leaf, _| {
        per_model
            .iter()
            .map(|values| values[leaf])
            .collect::<Vec<f64>>()
    });
    draws.insert_leaf(MODEL_INDEX_FIELD, (0..n_models).map(|m| m as f64).collect());
    Ok(draws)
}

/// Number of models stacked in `draws`.
pub fn num_models(draws: &ModelDraws) -> usize {
    draws
        .get(&[MODEL_INDEX_FIELD])
        .map(|indices| indices.len())
        .unwrap_or(0)
}

/// Scalar parameter set of one model.
pub fn select_model(draws: &ModelDraws, index: usize) -> Result<SampledTree, SamplerError> {
    let n_models = num_models(draws);
    if index >= n_models {
        return Err(SamplerError::ModelIndexOutOfRange { index, n_models });
    }
    draws.try_map(|values| {
        values
            .get(index)
            .copied()
            .ok_or(SamplerError::ModelIndexOutOfRange {
                index,
                n_models: values.len(),
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{encode_constant, encode_normal, encode_uniform};

    fn deflector_config() -> EncodedTree {
        ParamTree::new()
            .leaf("theta_e", encode_uniform(0.5, 2.0).unwrap())
            .leaf("gamma", encode_normal(2.0, 0.1).unwrap())
            .leaf("z_lens", encode_constant(0.5).unwrap())
            .branch(
                "shear",
                ParamTree::new()
                    .leaf("gamma1", encode_normal(0.0, 0.05).unwrap())
                    .leaf("gamma2", encode_normal(0.0, 0.05).unwrap()),
            )
    }

    #[test]
    fn test_draw_sample_keeps_shape() {
        let config = deflector_config();
        let drawn = draw_sample(&config, RngKey::new(1));

        let config_paths: Vec<String> = config.leaves().into_iter().map(|(p, _)| p).collect();
        let drawn_paths: Vec<String> = drawn.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(config_paths, drawn_paths);
        assert_eq!(*drawn.get(&["z_lens"]).unwrap(), 0.5);
    }

    #[test]
    fn test_draw_sample_is_pure() {
        let config = deflector_config();
        let key = RngKey::new(77);
        assert_eq!(draw_sample(&config, key), draw_sample(&config, key));
        assert_ne!(
            draw_sample(&config, key),
            draw_sample(&config, RngKey::new(78))
        );
    }

    #[test]
    fn test_each_leaf_uses_its_split_key() {
        let config = deflector_config();
        let key = RngKey::new(5);
        let drawn = draw_sample(&config, key);
        let keys = key.split(config.num_leaves());

        for (i, ((_, record), (_, value))) in config
            .leaves()
            .into_iter()
            .zip(drawn.leaves())
            .enumerate()
        {
            assert_eq!(record.draw(keys[i]), *value);
        }
    }

    #[test]
    fn test_theta_e_within_declared_range() {
        let config = deflector_config();
        let record = *config.get(&["theta_e"]).unwrap();

        for key in RngKey::new(9).split(200) {
            let theta_e = *draw_sample(&config, key).get(&["theta_e"]).unwrap();
            assert!((0.5..=2.0).contains(&theta_e));
            let label = record.normalize(theta_e).unwrap();
            assert!((0.0..=1.0).contains(&label));
        }
    }

    #[test]
    fn test_multiple_models_match_single_draws() {
        let config = deflector_config();
        let key = RngKey::new(31);
        let n_models = 4;

        let draws = extract_multiple_models(&config, key, n_models).unwrap();
        let model_keys = key.split(n_models);

        assert_eq!(num_models(&draws), n_models);
        for (m, model_key) in model_keys.iter().enumerate() {
            let mut expected = draw_sample(&config, *model_key);
            expected.insert_leaf(MODEL_INDEX_FIELD, m as f64);
            assert_eq!(select_model(&draws, m).unwrap(), expected);
        }
    }

    #[test]
    fn test_model_index_field() {
        let draws = extract_multiple_models(&deflector_config(), RngKey::new(2), 3).unwrap();
        assert_eq!(*draws.get(&[MODEL_INDEX_FIELD]).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(draws.get(&["theta_e"]).unwrap().len(), 3);
    }

    #[test]
    fn test_models_are_independent() {
        let draws = extract_multiple_models(&deflector_config(), RngKey::new(4), 2).unwrap();
        let theta_e = draws.get(&["theta_e"]).unwrap();
        assert_ne!(theta_e[0], theta_e[1]);
    }

    #[test]
    fn test_select_model_out_of_range() {
        let draws = extract_multiple_models(&deflector_config(), RngKey::new(2), 2).unwrap();
        assert_eq!(
            select_model(&draws, 2),
            Err(SamplerError::ModelIndexOutOfRange {
                index: 2,
                n_models: 2
            })
        );
    }

    #[test]
    fn test_select_model_short_leaf() {
        let draws: ModelDraws = ParamTree::new()
            .leaf("theta_e", vec![1.2])
            .leaf(MODEL_INDEX_FIELD, vec![0.0, 1.0]);
        assert_eq!(
            select_model(&draws, 1),
            Err(SamplerError::ModelIndexOutOfRange {
                index: 1,
                n_models: 1
            })
        );
        assert_eq!(*select_model(&draws, 0).unwrap().get(&["theta_e"]).unwrap(), 1.2);
    }

    #[test]
    fn test_zero_models_rejected() {
        assert_eq!(
            extract_multiple_models(&deflector_config(), RngKey::new(2), 0),
            Err(SamplerError::NoModels)
        );
    }
}
