//! Static checks applied to generated code before it reaches a kernel.
//! Line-based and deliberately conservative: the kernel is the real
//! sandbox boundary, this catches policy violations early and cheaply.

use plait_core::config::CodeInterpreterConfig;

pub struct CodeVerifier {
    allowed_modules: Vec<String>,
    forbidden_functions: Vec<String>,
}

impl CodeVerifier {
    pub fn from_config(config: &CodeInterpreterConfig) -> Self {
        Self {
            allowed_modules: config.allowed_modules.clone(),
            forbidden_functions: config.forbidden_functions.clone(),
        }
    }

    /// All policy findings for `code`, empty when it passes. An empty
    /// module allow-list disables the import check.
    pub fn verify(&self, code: &str) -> Result<(), String> {
        let mut findings = Vec::new();

        for (lineno, line) in code.lines().enumerate() {
            let line = line.trim();
            if !self.allowed_modules.is_empty() {
                if let Some(module) = imported_module(line) {
                    if !self.allowed_modules.iter().any(|m| m == module) {
                        findings.push(format!(
                            "line {}: import of '{}' is not allowed",
                            lineno + 1,
                            module
                        ));
                    }
                }
            }
            for function in &self.forbidden_functions {
                if line.contains(&format!("{function}(")) {
                    findings.push(format!(
                        "line {}: call to forbidden function '{}'",
                        lineno + 1,
                        function
                    ));
                }
            }
        }

        if findings.is_empty() {
            Ok(())
        } else {
            Err(findings.join("\n"))
        }
    }
}

/// Root module of an `import x` / `from x import y` line, if any.
fn imported_module(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("import ")
        .or_else(|| line.strip_prefix("from "))?;
    let token = rest.split_whitespace().next()?;
    Some(token.split('.').next().unwrap_or(token).trim_end_matches(','))
}
