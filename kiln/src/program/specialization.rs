use crate::program::SpecConstant;
use std::fmt::Write;

/// Prepends one `const SPEC_CONSTANT_<id>` declaration per constant to a stage source.
pub fn specialize(source: &str, constants: &[SpecConstant]) -> String {
    if constants.is_empty() {
        return source.to_string();
    }

    let mut specialized = String::with_capacity(source.len() + constants.len() * 48);
    for constant in constants {
        let _ = writeln!(
            specialized,
            "const SPEC_CONSTANT_{}: {} = {};",
            constant.id,
            constant.value.wgsl_type(),
            constant.value.wgsl_literal()
        );
    }
    specialized.push('\n');
    specialized.push_str(source);

    specialized
}
