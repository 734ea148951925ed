use burn::{
    prelude::*,
    tensor::{backend::Backend, BasicOps, Element, TensorData},
};

/// A trait for converting a batch of host values to a tensor
///
/// The agent turns `Vec<E::State>` into a `[batch, features]` tensor with this,
/// so an environment whose state is a fixed-size array works out of the box.
/// Other state types implement it themselves.
pub trait ToTensor<B: Backend, const D: usize, K: BasicOps<B>> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, D, K>;
}

impl<B, E, K> ToTensor<B, 1, K> for Vec<E>
where
    B: Backend,
    E: Element,
    K: BasicOps<B, Elem = E>,
{
    #[inline]
    fn to_tensor(self, device: &<B as Backend>::Device) -> Tensor<B, 1, K> {
        let len = self.len();
        Tensor::from_data(TensorData::new(self, [len]), device)
    }
}

/// `Vec<[E; A]>` → `[batch, A]`
impl<B, E, K, const A: usize> ToTensor<B, 2, K> for Vec<[E; A]>
where
    B: Backend,
    E: Element,
    K: BasicOps<B, Elem = E>,
{
    #[inline]
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2, K> {
        let batch_size = self.len();
        let mut flat = Vec::with_capacity(batch_size * A);
        for row in &self {
            flat.extend_from_slice(row);
        }

        Tensor::<B, 2, K>::from_data(TensorData::new(flat, [batch_size, A]), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };

    #[test]
    fn test_q_values_to_tensor_1d() {
        let device = NdArrayDevice::default();
        let q_values = vec![1.0_f32, -0.5, 0.25];
        let tensor: Tensor<NdArray, 1> = q_values.to_tensor(&device);

        assert_eq!(tensor.dims(), [3]);
        assert_eq!(tensor.to_data().to_vec::<f32>().unwrap(), vec![1.0, -0.5, 0.25]);
    }

    #[test]
    fn test_state_batch_to_tensor_2d() {
        let device = NdArrayDevice::default();
        let states = vec![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]];

        let tensor: Tensor<NdArray, 2> = states.to_tensor(&device);

        assert_eq!(tensor.dims(), [3, 2]);
        assert_eq!(
            tensor.to_data().to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_single_state_on_autodiff_backend() {
        let device = NdArrayDevice::default();
        let tensor: Tensor<Autodiff<NdArray>, 2> = vec![[0.5_f32]].to_tensor(&device);

        assert_eq!(tensor.dims(), [1, 1]);
        assert_eq!(tensor.inner().to_data().to_vec::<f32>().unwrap(), vec![0.5]);
    }

    #[test]
    fn test_action_batch_to_int_tensor() {
        let device = NdArrayDevice::default();
        // NdArray stores Int tensors as i64
        let actions = vec![[1_i64], [0]];
        let tensor: Tensor<NdArray, 2, Int> = actions.to_tensor(&device);

        assert_eq!(tensor.dims(), [2, 1]);
        assert_eq!(tensor.to_data().to_vec::<i64>().unwrap(), vec![1, 0]);
    }
}
