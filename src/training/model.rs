//! Sequence classifier architecture, serialized for the trainer.
//!
//! ```text
//! Input(seq_len, features)
//!   → LSTM(u0, return_sequences) → Dropout(0.3)
//!   → LSTM(u1)                   → Dropout(0.3)
//!   → [Dense(u, relu) → Dropout(0.2)] per dense unit
//!   → Dense(classes, softmax)
//! ```

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

pub const RECURRENT_DROPOUT: f64 = 0.3;
pub const DENSE_DROPOUT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Lstm { units: usize, return_sequences: bool },
    Dropout { rate: f64 },
    Dense { units: usize, activation: Activation },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Optimizer {
    Adam { learning_rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// `[sequence_length, features_per_frame]`
    pub input_shape: [usize; 2],
    pub layers: Vec<Layer>,
    pub optimizer: Optimizer,
    pub loss: String,
    pub metrics: Vec<String>,
}

impl ModelSpec {
    pub fn from_config(config: &TrainingConfig) -> Self {
        let mut layers = Vec::new();

        let recurrent = config.model.lstm_units.len();
        for (i, &units) in config.model.lstm_units.iter().enumerate() {
            layers.push(Layer::Lstm {
                units,
                return_sequences: i + 1 < recurrent,
            });
            layers.push(Layer::Dropout {
                rate: RECURRENT_DROPOUT,
            });
        }

        for &units in &config.model.dense_units {
            layers.push(Layer::Dense {
                units,
                activation: Activation::Relu,
            });
            layers.push(Layer::Dropout { rate: DENSE_DROPOUT });
        }

        layers.push(Layer::Dense {
            units: config.classes.len(),
            activation: Activation::Softmax,
        });

        Self {
            input_shape: [config.sequence_length, config.features_per_frame()],
            layers,
            optimizer: Optimizer::Adam {
                learning_rate: config.learning_rate,
            },
            loss: "categorical_crossentropy".to_string(),
            metrics: vec!["accuracy".to_string()],
        }
    }

    pub fn output_units(&self) -> usize {
        match self.layers.last() {
            Some(Layer::Dense { units, .. }) => *units,
            _ => 0,
        }
    }
}
