//! # Well-Known `DenseResNet` Configs

use crate::models::dense_resnet::DenseResNetContractConfig;
use crate::prefabs::{StaticPreFabConfig, StaticPreFabMap};

/// Well-known [`super::DenseResNet`] configs.
pub static PREFAB_DENSE_RESNET_MAP: StaticPreFabMap<DenseResNetContractConfig> = StaticPreFabMap {
    name: "dense_resnet",
    description: "Well-Known DenseResNet configs",

    items: &[
        &StaticPreFabConfig {
            name: "mnist",
            description: "1x28x28 inputs, width 1, depth 1",
            builder: || DenseResNetContractConfig::new(1, 28),
        },
        &StaticPreFabConfig {
            name: "cifar10",
            description: "3x32x32 inputs, width 1, depth 1",
            builder: || DenseResNetContractConfig::new(3, 32),
        },
        &StaticPreFabConfig {
            name: "cifar10_wide",
            description: "3x32x32 inputs, width 4, depth 1",
            builder: || DenseResNetContractConfig::new(3, 32).with_width(4),
        },
    ],
};
