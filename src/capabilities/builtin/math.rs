//! Arithmetic capability.

use async_trait::async_trait;

use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParamType, ParameterSchema,
};
use crate::error::CapabilityError;

/// Adds two numbers.
#[derive(Debug, Default)]
pub struct AddNumbers;

#[async_trait]
impl Capability for AddNumbers {
    fn name(&self) -> &str {
        "add_numbers"
    }

    fn description(&self) -> &str {
        "Add two numbers together and return the sum."
    }

    fn tags(&self) -> &[&str] {
        &["math", "triage"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("a", ParamType::Number, "First number")
            .required("b", ParamType::Number, "Second number")
    }

    async fn invoke(
        &self,
        args: Arguments,
        _ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let operand = |key: &str| {
            args.get(key)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| CapabilityError::ExecutionFailed {
                    name: self.name().to_string(),
                    reason: format!("'{key}' is not a number"),
                })
        };
        let (a, b) = (operand("a")?, operand("b")?);
        let sum = a + b;

        // Keep integral sums free of a trailing ".0".
        let rendered = if sum.fract() == 0.0 && sum.abs() < 1e15 {
            format!("{}", sum as i64)
        } else {
            sum.to_string()
        };
        Ok(CapabilityOutput::Text(rendered))
    }
}
