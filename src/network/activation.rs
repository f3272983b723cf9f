//! Activation primitives and their derivatives.
//!
//! Both functions are total over the finite reals.

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn tanh(x: f64) -> f64 {
    x.tanh()
}

/// Derivative of sigmoid expressed through its output `s = sigmoid(x)`.
#[inline]
pub fn sigmoid_derivative_from_output(s: f64) -> f64 {
    s * (1.0 - s)
}

/// Derivative of tanh expressed through its output `t = tanh(x)`.
#[inline]
pub fn tanh_derivative_from_output(t: f64) -> f64 {
    1.0 - t * t
}
