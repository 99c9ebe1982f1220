use wd_core::types::Patch;

/// Case-insensitive allow-list check on a patch's role/commit tag.
#[derive(Debug, Clone)]
pub struct RoleVerifier {
    allowed: Vec<String>,
}

impl RoleVerifier {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|r| r.as_ref().trim().to_ascii_uppercase())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Returns the matched role, or the reason the patch must be blocked.
    pub fn verify(&self, patch: &Patch) -> Result<String, String> {
        let Some(role) = extract_role(patch) else {
            return Err("no role tag".to_string());
        };
        let upper = role.to_ascii_uppercase();
        if self.allowed.iter().any(|a| *a == upper) {
            Ok(upper)
        } else {
            Err(format!("role {role} not in allow-list"))
        }
    }
}

/// The explicit `role` field, else a `role: X` line in the content, else a
/// leading `[TAG]` on the first non-empty line.
pub fn extract_role(patch: &Patch) -> Option<String> {
    let explicit = patch.role.trim();
    if !explicit.is_empty() {
        return Some(explicit.to_string());
    }

    for line in patch.content.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("role") {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let first = patch.content.lines().map(str::trim).find(|l| !l.is_empty())?;
    let tag = first.strip_prefix('[')?.split_once(']')?.0.trim();
    (!tag.is_empty()).then(|| tag.to_string())
}
