use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EwmaError {
    #[error("EMA span must be greater than 0, got {0}")]
    InvalidSpan(i64),
    #[error("EMA has not been initialized yet")]
    Uninitialized,
}

/// 指数移动平均，`alpha = 2 / (span + 1)`
///
/// 第一次 `update` 直接把输入作为当前值，不做平滑。
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(span: i64) -> Result<Self, EwmaError> {
        if span <= 0 {
            return Err(EwmaError::InvalidSpan(span));
        }
        Ok(Self {
            alpha: 2.0 / (span as f64 + 1.0),
            value: 0.0,
            initialized: false,
        })
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
        self.value
    }

    pub fn value(&self) -> Result<f64, EwmaError> {
        if !self.initialized {
            return Err(EwmaError::Uninitialized);
        }
        Ok(self.value)
    }
}
