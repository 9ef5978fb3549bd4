// ============================================================
// Layer 5 — Voxel UNet
// ============================================================
// A 3D encoder-decoder with residual blocks and skip
// connections. Each encoder stage runs its residual units, then
// a strided convolution downsamples into the next width; the
// decoder mirrors with transposed convolutions, concatenating
// the matching encoder feature map before refining. The final
// 1x1x1 projection emits raw logits: the sigmoid lives in the
// loss and metric, never in the model.
//
// Shape contract: input spatial extents must be divisible by the
// product of the configured strides, otherwise the decoder
// cannot reproduce the input shape. `check_spatial_shape` makes
// that an explicit setup-time check.

use burn::nn::conv::{
    Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig,
};
use burn::nn::{GroupNorm, GroupNormConfig, PaddingConfig3d, Relu};
use burn::prelude::*;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct VoxelUnetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Feature widths per resolution stage, shallowest first
    pub channels: Vec<usize>,
    /// Downsampling factor between consecutive stages;
    /// exactly one fewer entry than `channels`
    pub strides: Vec<usize>,
    /// Residual units run at every stage
    pub num_res_units: usize,
}

impl VoxelUnetConfig {
    /// Reject inconsistent stage configuration before any tensor
    /// is allocated.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels.is_empty() {
            anyhow::bail!("at least one channel stage is required");
        }
        if self.strides.len() + 1 != self.channels.len() {
            anyhow::bail!(
                "expected {} strides for {} channel stages, got {}",
                self.channels.len() - 1,
                self.channels.len(),
                self.strides.len()
            );
        }
        if self.strides.iter().any(|&s| s == 0) {
            anyhow::bail!("strides must be positive");
        }
        if self.num_res_units == 0 {
            anyhow::bail!("num_res_units must be at least 1");
        }
        Ok(())
    }

    /// Verify that a spatial shape survives the encoder-decoder
    /// path exactly. Called by the workflow when it wires crop
    /// and resize sizes, so a bad pairing fails at setup rather
    /// than at the first forward pass.
    pub fn check_spatial_shape(&self, spatial: [usize; 3]) -> anyhow::Result<()> {
        let factor: usize = self.strides.iter().product();
        for (axis, &extent) in spatial.iter().enumerate() {
            if extent == 0 || extent % factor != 0 {
                anyhow::bail!(
                    "spatial shape {:?} is not divisible by the cumulative stride {} on axis {}",
                    spatial,
                    factor,
                    axis
                );
            }
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> VoxelUnet<B> {
        let depth = self.channels.len();

        let mut encoders = Vec::with_capacity(depth - 1);
        let mut in_ch = self.in_channels;
        for stage in 0..depth - 1 {
            let width = self.channels[stage];
            encoders.push(EncoderStage {
                units: residual_chain(in_ch, width, self.num_res_units, device),
                downsample: conv3x3(width, self.channels[stage + 1], self.strides[stage], device),
            });
            in_ch = self.channels[stage + 1];
        }

        let bottleneck = residual_chain(in_ch, in_ch, self.num_res_units, device);

        let mut decoders = Vec::with_capacity(depth - 1);
        for stage in (0..depth - 1).rev() {
            let skip_ch = self.channels[stage];
            decoders.push(DecoderStage {
                upsample: deconv3x3(self.channels[stage + 1], skip_ch, self.strides[stage], device),
                units: residual_chain(2 * skip_ch, skip_ch, self.num_res_units, device),
            });
        }

        let head = Conv3dConfig::new([self.channels[0], self.out_channels], [1, 1, 1]).init(device);

        VoxelUnet {
            encoders,
            bottleneck,
            decoders,
            head,
        }
    }
}

fn conv3x3<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    stride: usize,
    device: &B::Device,
) -> Conv3d<B> {
    Conv3dConfig::new([in_ch, out_ch], [3, 3, 3])
        .with_stride([stride, stride, stride])
        .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
        .init(device)
}

/// Transposed conv sized so the output extent is exactly
/// `stride * input` for any stride (kernel 3, padding 1,
/// output padding stride - 1).
fn deconv3x3<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    stride: usize,
    device: &B::Device,
) -> ConvTranspose3d<B> {
    ConvTranspose3dConfig::new([in_ch, out_ch], [3, 3, 3])
        .with_stride([stride, stride, stride])
        .with_padding([1, 1, 1])
        .with_padding_out([stride - 1, stride - 1, stride - 1])
        .init(device)
}

fn residual_chain<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    count: usize,
    device: &B::Device,
) -> Vec<ResidualUnit<B>> {
    (0..count)
        .map(|i| {
            let unit_in = if i == 0 { in_ch } else { out_ch };
            ResidualUnitConfig::new(unit_in, out_ch).init(device)
        })
        .collect()
}

// ─── Residual Unit ────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct ResidualUnitConfig {
    pub in_channels: usize,
    pub out_channels: usize,
}

impl ResidualUnitConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualUnit<B> {
        let shortcut = if self.in_channels != self.out_channels {
            Some(
                Conv3dConfig::new([self.in_channels, self.out_channels], [1, 1, 1]).init(device),
            )
        } else {
            None
        };

        // Group count equal to the channel count normalises each
        // channel independently.
        ResidualUnit {
            conv1: conv3x3(self.in_channels, self.out_channels, 1, device),
            norm1: GroupNormConfig::new(self.out_channels, self.out_channels).init(device),
            conv2: conv3x3(self.out_channels, self.out_channels, 1, device),
            norm2: GroupNormConfig::new(self.out_channels, self.out_channels).init(device),
            shortcut,
            activation: Relu::new(),
        }
    }
}

/// conv → norm → relu → conv → norm, added onto a (possibly
/// projected) identity path, with a trailing relu.
#[derive(Module, Debug)]
pub struct ResidualUnit<B: Backend> {
    conv1: Conv3d<B>,
    norm1: GroupNorm<B>,
    conv2: Conv3d<B>,
    norm2: GroupNorm<B>,
    shortcut: Option<Conv3d<B>>,
    activation: Relu,
}

impl<B: Backend> ResidualUnit<B> {
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let residual = match &self.shortcut {
            Some(proj) => proj.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.activation.forward(self.norm1.forward(self.conv1.forward(input)));
        let x = self.norm2.forward(self.conv2.forward(x));
        self.activation.forward(x + residual)
    }
}

// ─── Stages ───────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    units: Vec<ResidualUnit<B>>,
    downsample: Conv3d<B>,
}

#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    upsample: ConvTranspose3d<B>,
    units: Vec<ResidualUnit<B>>,
}

// ─── VoxelUnet ────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct VoxelUnet<B: Backend> {
    encoders: Vec<EncoderStage<B>>,
    bottleneck: Vec<ResidualUnit<B>>,
    decoders: Vec<DecoderStage<B>>,
    head: Conv3d<B>,
}

impl<B: Backend> VoxelUnet<B> {
    /// input: [batch, in_channels, x, y, z]
    /// output: [batch, out_channels, x, y, z] — raw logits
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut skips: Vec<Tensor<B, 5>> = Vec::with_capacity(self.encoders.len());

        let mut x = input;
        for stage in &self.encoders {
            for unit in &stage.units {
                x = unit.forward(x);
            }
            skips.push(x.clone());
            x = stage.downsample.forward(x);
        }

        for unit in &self.bottleneck {
            x = unit.forward(x);
        }

        // Decoder stages are stored deepest first, matching the
        // reversed skip order.
        for (stage, skip) in self.decoders.iter().zip(skips.into_iter().rev()) {
            x = stage.upsample.forward(x);
            x = Tensor::cat(vec![x, skip], 1);
            for unit in &stage.units {
                x = unit.forward(x);
            }
        }

        self.head.forward(x)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    fn small_config() -> VoxelUnetConfig {
        VoxelUnetConfig::new(1, 1, vec![4, 8], vec![2], 1)
    }

    #[test]
    fn test_forward_preserves_spatial_shape_and_channels() {
        let device = Default::default();
        let cfg = VoxelUnetConfig::new(1, 2, vec![4, 8, 16], vec![2, 2], 1);
        cfg.validate().unwrap();
        cfg.check_spatial_shape([16, 16, 16]).unwrap();

        let model: VoxelUnet<B> = cfg.init(&device);
        let input = Tensor::<B, 5>::zeros([2, 1, 16, 16, 16], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 2, 16, 16, 16]);
    }

    #[test]
    fn test_indivisible_shape_rejected_up_front() {
        let cfg = small_config();
        assert!(cfg.check_spatial_shape([15, 16, 16]).is_err());
        assert!(cfg.check_spatial_shape([16, 16, 16]).is_ok());
    }

    #[test]
    fn test_stride_count_must_match_stages() {
        let cfg = VoxelUnetConfig::new(1, 1, vec![4, 8, 16], vec![2], 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_logits_are_unbounded() {
        // No activation on the head: a zero-initialised input
        // still produces values outside [0, 1] once weights are
        // random, so just assert finite raw output.
        let device = Default::default();
        let model: VoxelUnet<B> = small_config().init(&device);
        let input = Tensor::<B, 5>::ones([1, 1, 8, 8, 8], &device);
        let output = model.forward(input);
        let values: Vec<f32> = output.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
