use crate::dataset::{HEIGHT, NUM_CLASSES, WIDTH};
use burn::{
    module::Param,
    nn::{
        Initializer, Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    train::ClassificationOutput,
};

pub trait ModelConfigExt<B: Backend>: Config {
    type Model: Module<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
}

/// LeNet: two convolution + max-pool stages followed by two dense layers.
#[derive(Config, Debug)]
pub struct LeNetConfig {
    #[config(default = 20)]
    pub conv1_filters: usize,
    #[config(default = 50)]
    pub conv2_filters: usize,
    #[config(default = 5)]
    pub kernel_size: usize,
    #[config(default = 500)]
    pub hidden_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl LeNetConfig {
    /// Width of the flattened feature map after both pooling stages.
    pub fn flat_size(&self) -> usize {
        // each 2x2 pool halves both spatial dims
        self.conv2_filters * (HEIGHT / 4) * (WIDTH / 4)
    }
}

#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub pool1: MaxPool2d,
    pub conv2: Conv2d<B>,
    pub pool2: MaxPool2d,
    pub dense1: Linear<B>,
    pub dense2: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> ModelConfigExt<B> for LeNetConfig {
    type Model = LeNet<B>;

    fn init(&self, device: &B::Device) -> Self::Model {
        LeNetConfig::init::<B>(self, device)
    }
}

/// Glorot uniform, the Keras default for conv and dense kernels.
const KERNEL_INIT: Initializer = Initializer::XavierUniform { gain: 1.0 };

fn zero_bias<B: Backend>(bias: Option<Param<Tensor<B, 1>>>) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|bias| {
        let bias = bias.val();
        Param::from_tensor(bias.zeros_like())
    })
}

impl LeNetConfig {
    /// Returns the initialized model, with Glorot-uniform weights and zero biases.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet<B> {
        let kernel = [self.kernel_size, self.kernel_size];
        let mut conv1 = Conv2dConfig::new([1, self.conv1_filters], kernel)
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(KERNEL_INIT)
            .init(device);
        let mut conv2 = Conv2dConfig::new([self.conv1_filters, self.conv2_filters], kernel)
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(KERNEL_INIT)
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]);
        let mut dense1 = LinearConfig::new(self.flat_size(), self.hidden_size)
            .with_initializer(KERNEL_INIT)
            .init(device);
        let mut dense2 = LinearConfig::new(self.hidden_size, self.num_classes)
            .with_initializer(KERNEL_INIT)
            .init(device);
        conv1.bias = zero_bias(conv1.bias);
        conv2.bias = zero_bias(conv2.bias);
        dense1.bias = zero_bias(dense1.bias);
        dense2.bias = zero_bias(dense2.bias);

        LeNet {
            conv1,
            pool1: pool.init(),
            conv2,
            pool2: pool.init(),
            dense1,
            dense2,
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> LeNet<B> {
    /// # Shapes
    ///
    /// - images: `[batch_size, HEIGHT * WIDTH]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch_size, input_size] = images.dims();
        assert_eq!(input_size, HEIGHT * WIDTH);

        let x = images.reshape([batch_size, 1, HEIGHT, WIDTH]);

        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.pool1.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool2.forward(x);

        let [_batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.dense1.forward(x));
        self.dense2.forward(x)
    }

    /// Logits plus the sparse softmax cross-entropy against `targets`.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let [batch_size, _input_size] = images.dims();
        assert_eq!([batch_size], targets.dims());

        let [_hidden_size, num_classes] = self.dense2.weight.dims();
        let output = self.forward(images);
        assert_eq!([batch_size, num_classes], output.dims());

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
