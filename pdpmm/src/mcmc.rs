use rand::Rng;

use crate::models::Model;

pub mod samplers;

/// Trait for Markov Chain Monte Carlo Samplers.
pub trait Sampler<M, D>: Sized
where
    M: Model<D>,
{
    /// Step the Sampler.
    fn step<R: Rng>(&mut self, model: M, data: &D, rng: &mut R) -> M;

    /// Step the sampler `steps` times, keeping only the last state.
    fn multi_step<R: Rng>(&mut self, model: M, data: &D, steps: usize, rng: &mut R) -> M {
        (0..steps).fold(model, |acc, _| self.step(acc, data, rng))
    }
}
