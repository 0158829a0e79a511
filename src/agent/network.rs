//! Convolutional Q-network
//!
//! The classic DQN Atari architecture: up to three convolutional layers
//! followed by one fully-connected layer and a linear head with one output
//! per action.
//!
//! # Architecture (three-layer configuration)
//!
//! ```text
//! Input [stack, 84, 84]
//!        |
//!   [Conv 32, 8x8, stride 4] - ReLU
//!        |
//!   [Conv 64, 4x4, stride 2] - ReLU
//!        |
//!   [Conv 64, 3x3, stride 1] - ReLU
//!        |
//!      Flatten
//!        |
//!   [Dense 512] - ReLU
//!        |
//!   [Dense n_actions]
//! ```
//!
//! Shallower variants drop trailing conv layers, which trades accuracy for
//! speed on small machines.

use anyhow::{anyhow, Result};
use tch::nn::{self, Module};
use tch::Tensor;

/// Per-layer shape of the conv stack: (out channels, kernel, stride).
const CONV_SHAPES: [(i64, i64, i64); 3] = [(32, 8, 4), (64, 4, 2), (64, 3, 1)];

/// Q-network architecture parameters.
#[derive(Debug, Clone, Copy)]
pub struct QNetworkConfig {
    /// Number of convolutional layers (1 to 3)
    pub conv_layers: usize,
    /// Width of the fully-connected layer
    pub fc_size: i64,
}

impl Default for QNetworkConfig {
    fn default() -> Self {
        Self { conv_layers: 3, fc_size: 512 }
    }
}

impl QNetworkConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.conv_layers) {
            return Err(anyhow!("conv_layers must be between 1 and 3"));
        }
        if self.fc_size <= 0 {
            return Err(anyhow!("fc_size must be positive"));
        }
        Ok(())
    }
}

fn conv_out(size: i64, kernel: i64, stride: i64) -> i64 {
    (size - kernel) / stride + 1
}

/// Deep Q-network over stacked frames.
#[derive(Debug)]
pub struct QNetwork {
    seq: nn::Sequential,
}

impl QNetwork {
    /// Build the network under `vs`.
    ///
    /// # Arguments
    ///
    /// * `vs` - Variable store path to register parameters under
    /// * `in_channels` - Number of stacked frames
    /// * `height`, `width` - Processed frame dimensions
    /// * `n_actions` - Number of discrete actions
    /// * `config` - Architecture parameters
    pub fn new(
        vs: &nn::Path,
        in_channels: i64,
        height: i64,
        width: i64,
        n_actions: i64,
        config: QNetworkConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut seq = nn::seq();
        let mut channels = in_channels;
        let mut h = height;
        let mut w = width;

        for (i, &(out_channels, kernel, stride)) in
            CONV_SHAPES.iter().take(config.conv_layers).enumerate()
        {
            h = conv_out(h, kernel, stride);
            w = conv_out(w, kernel, stride);
            if h <= 0 || w <= 0 {
                return Err(anyhow!(
                    "input {height}x{width} too small for {} conv layers",
                    config.conv_layers
                ));
            }

            let conv_config = nn::ConvConfig { stride, ..Default::default() };
            seq = seq
                .add(nn::conv2d(
                    vs / format!("conv{}", i + 1),
                    channels,
                    out_channels,
                    kernel,
                    conv_config,
                ))
                .add_fn(|xs| xs.relu());
            channels = out_channels;
        }

        let flat = channels * h * w;
        seq = seq
            .add_fn(|xs| xs.flat_view())
            .add(nn::linear(vs / "fc", flat, config.fc_size, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(vs / "head", config.fc_size, n_actions, Default::default()));

        Ok(Self { seq })
    }
}

impl Module for QNetwork {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.seq.forward(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn forward_shape(conv_layers: usize) -> Vec<i64> {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = QNetworkConfig { conv_layers, fc_size: 64 };
        let net = QNetwork::new(&vs.root(), 4, 84, 84, 18, config).unwrap();

        let input = Tensor::randn([2, 4, 84, 84], (Kind::Float, Device::Cpu));
        net.forward(&input).size()
    }

    #[test]
    fn test_forward_shape_all_depths() {
        assert_eq!(forward_shape(1), vec![2, 18]);
        assert_eq!(forward_shape(2), vec![2, 18]);
        assert_eq!(forward_shape(3), vec![2, 18]);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(QNetworkConfig { conv_layers: 0, fc_size: 512 }.validate().is_err());
        assert!(QNetworkConfig { conv_layers: 4, fc_size: 512 }.validate().is_err());
        assert!(QNetworkConfig { conv_layers: 2, fc_size: 0 }.validate().is_err());
    }

    #[test]
    fn test_rejects_undersized_input() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = QNetworkConfig { conv_layers: 3, fc_size: 64 };
        assert!(QNetwork::new(&vs.root(), 4, 10, 10, 18, config).is_err());
    }

    #[test]
    fn test_batch_independence() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net =
            QNetwork::new(&vs.root(), 2, 20, 20, 6, QNetworkConfig { conv_layers: 1, fc_size: 32 })
                .unwrap();

        let single = Tensor::randn([1, 2, 20, 20], (Kind::Float, Device::Cpu));
        let q_single = net.forward(&single);

        let batch = single.repeat([4, 1, 1, 1]);
        let q_batch = net.forward(&batch);

        for i in 0..4 {
            let diff = (&q_single.squeeze() - q_batch.get(i)).abs().max();
            let diff_val: f64 = diff.try_into().unwrap();
            assert!(diff_val < 1e-5);
        }
    }
}
