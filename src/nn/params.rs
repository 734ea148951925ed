//! Name-keyed parameter storage shared by policies and the TRPO update
//!
//! Every tensor is stored flattened next to its original shape, so parameters of
//! different rank can live in one ordered collection. Burn tensors are immutable
//! values: cloning a [`ParameterSet`] yields an independent snapshot, and no
//! operation on the clone can be observed through the original.

use burn::{prelude::*, tensor::backend::AutodiffBackend};

use crate::error::{Result, TrpoError};

/// A single named tensor, stored flat
#[derive(Debug, Clone)]
pub struct Parameter<B: Backend> {
    name: String,
    shape: Vec<usize>,
    value: Tensor<B, 1>,
}

impl<B: Backend> Parameter<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shape the tensor had when it was inserted
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The flattened values
    pub fn value(&self) -> &Tensor<B, 1> {
        &self.value
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// The values restored to their original shape
    pub fn reshaped<const D: usize>(&self) -> Result<Tensor<B, D>> {
        let dims: [usize; D] =
            self.shape
                .clone()
                .try_into()
                .map_err(|shape: Vec<usize>| TrpoError::RankMismatch {
                    name: self.name.clone(),
                    rank: shape.len(),
                    requested: D,
                })?;
        Ok(self.value.clone().reshape(dims))
    }
}

/// Ordered mapping from parameter name to tensor
///
/// Insertion order is preserved and matches the layer order of the network that
/// owns the set.
#[derive(Debug, Clone)]
pub struct ParameterSet<B: Backend> {
    entries: Vec<Parameter<B>>,
}

impl<B: Backend> Default for ParameterSet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ParameterSet<B> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a tensor of any rank under `name`
    pub fn insert<const D: usize>(&mut self, name: impl Into<String>, tensor: Tensor<B, D>) -> Result<()> {
        let shape = tensor.dims().to_vec();
        let flat = tensor.reshape([shape.iter().product::<usize>()]);
        self.insert_flat(name, shape, flat)
    }

    /// Append an already flattened tensor together with the shape it represents
    pub fn insert_flat(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        value: Tensor<B, 1>,
    ) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(TrpoError::DuplicateParameter(name));
        }
        let numel: usize = shape.iter().product();
        if value.dims()[0] != numel {
            return Err(TrpoError::ShapeMismatch {
                name,
                expected: shape,
                found: value.dims().to_vec(),
            });
        }
        self.entries.push(Parameter { name, shape, value });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Parameter<B>> {
        self.entries.iter().find(|p| p.name == name)
    }

    /// Like [`get`](Self::get), but a missing name is an error
    pub fn require(&self, name: &str) -> Result<&Parameter<B>> {
        self.get(name)
            .ok_or_else(|| TrpoError::MissingParameter(name.to_string()))
    }

    /// The tensor stored under `name`, restored to its original rank
    pub fn tensor<const D: usize>(&self, name: &str) -> Result<Tensor<B, D>> {
        self.require(name)?.reshaped()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter<B>> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalar parameters
    pub fn num_elements(&self) -> usize {
        self.entries.iter().map(Parameter::num_elements).sum()
    }

    /// Fails unless `other` holds exactly the same names, in the same order, with the same shapes
    pub fn check_layout<K: Backend>(&self, other: &ParameterSet<K>) -> Result<()> {
        check_layout(&self.entries, &other.entries)
    }

    /// Replace every value with the one from `other`
    ///
    /// The layout is validated before anything is written, so on error `self` is
    /// left untouched.
    pub fn assign(&mut self, other: ParameterSet<B>) -> Result<()> {
        self.check_layout(&other)?;
        for (dst, src) in self.entries.iter_mut().zip(other.entries) {
            dst.value = src.value;
        }
        Ok(())
    }

    /// A copy with `value` substituted for the parameter `name`
    pub fn with_value(&self, name: &str, value: Tensor<B, 1>) -> Result<Self> {
        let mut next = self.clone();
        let slot = next
            .entries
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| TrpoError::MissingParameter(name.to_string()))?;
        if value.dims()[0] != slot.num_elements() {
            return Err(TrpoError::ShapeMismatch {
                name: name.to_string(),
                expected: slot.shape.clone(),
                found: value.dims().to_vec(),
            });
        }
        slot.value = value;
        Ok(next)
    }

    /// `self + scale * update`, as a new set
    pub fn perturbed(&self, update: &UpdateVector<B>, scale: f64) -> Result<Self> {
        check_layout(&self.entries, &update.directions.entries)?;
        let entries = self
            .entries
            .iter()
            .zip(update.directions.entries.iter())
            .map(|(param, dir)| Parameter {
                name: param.name.clone(),
                shape: param.shape.clone(),
                value: param.value.clone() + dir.value.clone().mul_scalar(scale),
            })
            .collect();
        Ok(Self { entries })
    }

    /// Every value concatenated into one vector, in insertion order
    pub fn flatten(&self) -> Option<Tensor<B, 1>> {
        if self.entries.is_empty() {
            return None;
        }
        Some(Tensor::cat(
            self.entries.iter().map(|p| p.value.clone()).collect(),
            0,
        ))
    }

    /// A set with this layout whose values are read consecutively from `flat`
    ///
    /// Inverse of [`flatten`](Self::flatten).
    pub fn unflatten(&self, flat: Tensor<B, 1>) -> Result<Self> {
        let total = self.num_elements();
        if flat.dims()[0] != total {
            return Err(TrpoError::ShapeMismatch {
                name: "<flattened>".to_string(),
                expected: vec![total],
                found: flat.dims().to_vec(),
            });
        }

        let mut offset = 0;
        let entries = self
            .entries
            .iter()
            .map(|p| {
                let end = offset + p.num_elements();
                let value = flat.clone().slice([offset..end]);
                offset = end;
                Parameter {
                    name: p.name.clone(),
                    shape: p.shape.clone(),
                    value,
                }
            })
            .collect();
        Ok(Self { entries })
    }

    /// Move the values onto an autodiff backend wrapping `B`, without tracking gradients
    pub fn lift<A>(&self) -> ParameterSet<A>
    where
        A: AutodiffBackend<InnerBackend = B>,
    {
        self.lift_with(|value| Tensor::from_inner(value))
    }

    /// Move the values onto an autodiff backend as fresh leaves that record gradients
    pub fn lift_tracked<A>(&self) -> ParameterSet<A>
    where
        A: AutodiffBackend<InnerBackend = B>,
    {
        self.lift_with(|value| Tensor::from_inner(value).require_grad())
    }

    fn lift_with<A, F>(&self, lift: F) -> ParameterSet<A>
    where
        A: AutodiffBackend<InnerBackend = B>,
        F: Fn(Tensor<B, 1>) -> Tensor<A, 1>,
    {
        ParameterSet {
            entries: self
                .entries
                .iter()
                .map(|p| Parameter {
                    name: p.name.clone(),
                    shape: p.shape.clone(),
                    value: lift(p.value.clone()),
                })
                .collect(),
        }
    }
}

impl<A: AutodiffBackend> ParameterSet<A> {
    /// Gradients of every tracked leaf, with the same layout, on the inner backend
    pub fn gradients(&self, grads: &A::Gradients) -> Result<ParameterSet<A::InnerBackend>> {
        let mut out = ParameterSet::new();
        for p in &self.entries {
            let grad = p
                .value
                .grad(grads)
                .ok_or_else(|| TrpoError::MissingGradient(p.name.clone()))?;
            out.insert_flat(p.name.clone(), p.shape.clone(), grad)?;
        }
        Ok(out)
    }
}

/// Per-parameter step directions produced by one natural-gradient computation
///
/// Same names, order and shapes as the parameter set it was computed for.
#[derive(Debug, Clone)]
pub struct UpdateVector<B: Backend> {
    directions: ParameterSet<B>,
}

impl<B: Backend> UpdateVector<B> {
    pub(crate) fn new() -> Self {
        Self {
            directions: ParameterSet::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &str, shape: Vec<usize>, direction: Tensor<B, 1>) -> Result<()> {
        self.directions.insert_flat(name, shape, direction)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter<B>> {
        self.directions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter<B>> {
        self.directions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.directions.names()
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }
}

fn check_layout<A: Backend, K: Backend>(expected: &[Parameter<A>], found: &[Parameter<K>]) -> Result<()> {
    let same_names = expected.len() == found.len()
        && expected.iter().zip(found).all(|(e, f)| e.name == f.name);
    if !same_names {
        return Err(TrpoError::KeysetMismatch {
            expected: expected.iter().map(|p| p.name.clone()).collect(),
            found: found.iter().map(|p| p.name.clone()).collect(),
        });
    }
    for (e, f) in expected.iter().zip(found) {
        if e.shape != f.shape {
            return Err(TrpoError::ShapeMismatch {
                name: e.name.clone(),
                expected: e.shape.clone(),
                found: f.shape.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray;

    fn values(tensor: &Tensor<TestBackend, 1>) -> Vec<f32> {
        tensor.to_data().to_vec::<f32>().unwrap()
    }

    fn two_layer_set(device: &NdArrayDevice) -> ParameterSet<TestBackend> {
        let mut set = ParameterSet::new();
        set.insert(
            "layers.0.weight",
            Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], device),
        )
        .unwrap();
        set.insert(
            "layers.0.bias",
            Tensor::<TestBackend, 1>::from_floats([0.5, -0.5], device),
        )
        .unwrap();
        set
    }

    #[test]
    fn test_insert_preserves_order_and_shape() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        assert_eq!(set.names(), vec!["layers.0.weight", "layers.0.bias"]);
        assert_eq!(set.require("layers.0.weight").unwrap().shape(), &[2, 2]);
        assert_eq!(set.num_elements(), 6);

        let weight: Tensor<TestBackend, 2> = set.tensor("layers.0.weight").unwrap();
        assert_eq!(weight.dims(), [2, 2]);
    }

    #[test]
    fn test_duplicate_and_missing_names_are_rejected() {
        let device = NdArrayDevice::default();
        let mut set = two_layer_set(&device);

        let dup = set.insert("layers.0.bias", Tensor::<TestBackend, 1>::zeros([2], &device));
        assert!(matches!(dup, Err(TrpoError::DuplicateParameter(_))));
        assert!(matches!(set.require("nope"), Err(TrpoError::MissingParameter(_))));
    }

    #[test]
    fn test_tensor_with_wrong_rank_is_an_error() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        let result = set.tensor::<1>("layers.0.weight");
        assert!(matches!(result, Err(TrpoError::RankMismatch { rank: 2, requested: 1, .. })));
    }

    #[test]
    fn test_perturbed_leaves_original_untouched() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        let mut update = UpdateVector::new();
        update
            .push("layers.0.weight", vec![2, 2], Tensor::from_floats([1.0, 1.0, 1.0, 1.0], &device))
            .unwrap();
        update
            .push("layers.0.bias", vec![2], Tensor::from_floats([2.0, 2.0], &device))
            .unwrap();

        let candidate = set.perturbed(&update, 0.5).unwrap();

        assert_eq!(
            values(candidate.require("layers.0.weight").unwrap().value()),
            vec![1.5, 2.5, 3.5, 4.5]
        );
        assert_eq!(values(candidate.require("layers.0.bias").unwrap().value()), vec![1.5, 0.5]);
        assert_eq!(
            values(set.require("layers.0.weight").unwrap().value()),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_perturbed_rejects_mismatched_keyset() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        let mut update = UpdateVector::new();
        update
            .push("layers.0.weight", vec![2, 2], Tensor::zeros([4], &device))
            .unwrap();

        let result = set.perturbed(&update, 1.0);
        assert!(matches!(result, Err(TrpoError::KeysetMismatch { .. })));
    }

    #[test]
    fn test_assign_is_all_or_nothing() {
        let device = NdArrayDevice::default();
        let mut set = two_layer_set(&device);

        // Same names, but the bias has the wrong shape: nothing may be written.
        let mut bad = ParameterSet::new();
        bad.insert("layers.0.weight", Tensor::<TestBackend, 2>::zeros([2, 2], &device))
            .unwrap();
        bad.insert("layers.0.bias", Tensor::<TestBackend, 1>::zeros([3], &device))
            .unwrap();

        assert!(matches!(set.assign(bad), Err(TrpoError::ShapeMismatch { .. })));
        assert_eq!(
            values(set.require("layers.0.weight").unwrap().value()),
            vec![1.0, 2.0, 3.0, 4.0]
        );

        let mut good = ParameterSet::new();
        good.insert("layers.0.weight", Tensor::<TestBackend, 2>::zeros([2, 2], &device))
            .unwrap();
        good.insert("layers.0.bias", Tensor::<TestBackend, 1>::ones([2], &device))
            .unwrap();
        set.assign(good).unwrap();

        assert_eq!(values(set.require("layers.0.weight").unwrap().value()), vec![0.0; 4]);
        assert_eq!(values(set.require("layers.0.bias").unwrap().value()), vec![1.0, 1.0]);
    }

    #[test]
    fn test_flatten_concatenates_in_order() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        let flat = set.flatten().unwrap();
        assert_eq!(values(&flat), vec![1.0, 2.0, 3.0, 4.0, 0.5, -0.5]);
        assert!(ParameterSet::<TestBackend>::new().flatten().is_none());
    }

    #[test]
    fn test_unflatten_restores_layout() {
        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);

        let flat = Tensor::<TestBackend, 1>::from_floats([6.0, 5.0, 4.0, 3.0, 2.0, 1.0], &device);
        let restored = set.unflatten(flat).unwrap();

        assert!(set.check_layout(&restored).is_ok());
        assert_eq!(values(restored.require("layers.0.weight").unwrap().value()), vec![6.0, 5.0, 4.0, 3.0]);
        assert_eq!(values(restored.require("layers.0.bias").unwrap().value()), vec![2.0, 1.0]);

        let short = Tensor::<TestBackend, 1>::zeros([5], &device);
        assert!(matches!(set.unflatten(short), Err(TrpoError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_gradients_of_tracked_leaves() {
        use burn::backend::Autodiff;
        type Ad = Autodiff<TestBackend>;

        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);
        let tracked = set.lift_tracked::<Ad>();

        // d/dθ Σ θ² = 2θ
        let loss = tracked
            .iter()
            .map(|p| p.value().clone().powf_scalar(2.0).sum())
            .reduce(|a, b| a + b)
            .unwrap();
        let grads = tracked.gradients(&loss.backward()).unwrap();

        assert_eq!(values(grads.require("layers.0.weight").unwrap().value()), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(values(grads.require("layers.0.bias").unwrap().value()), vec![1.0, -1.0]);
    }

    #[test]
    fn test_untracked_lift_reports_missing_gradient() {
        use burn::backend::Autodiff;
        type Ad = Autodiff<TestBackend>;

        let device = NdArrayDevice::default();
        let set = two_layer_set(&device);
        let tracked = set.lift_tracked::<Ad>();
        let frozen = set.lift::<Ad>();

        let loss = tracked.flatten().unwrap().sum() + frozen.flatten().unwrap().sum();
        let grads = loss.backward();

        assert!(tracked.gradients(&grads).is_ok());
        assert!(matches!(frozen.gradients(&grads), Err(TrpoError::MissingGradient(_))));
    }
}
