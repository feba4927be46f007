//! Prompt expansion for batch generation.
//!
//! A batch is described by a subject, a set of variation axes and an
//! optional `{placeholder}` template. [`PromptExpander`] turns that
//! description into concrete prompt strings. Expansion is deterministic:
//! the same inputs always yield the same sequence, which is what lets
//! [`preview_prompts`] show exactly what a real batch will start with.
//!
//! Axes are visited in lexicographic name order (the map is a
//! [`BTreeMap`]), values in the order they were supplied. In
//! [`SamplingMode::Exhaustive`] the Cartesian product is enumerated like
//! an odometer with the last axis turning fastest, then wraps around once
//! every combination has been used.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::error::CoreError;

/// Variation axes: axis name to the ordered list of values it may take.
pub type Variations = BTreeMap<String, Vec<String>>;

/// Placeholder that always resolves to the batch subject.
pub const SUBJECT_PLACEHOLDER: &str = "subject";

/// Leading part of the template used when a batch has none.
/// Every non-empty axis is appended as `, {axis}`.
pub const DEFAULT_TEMPLATE_PREFIX: &str = "a high quality photo of {subject}";

/// Upper bound on images in a single batch.
pub const MAX_BATCH_IMAGES: usize = 10_000;

/// Upper bound on prompts returned by a preview.
pub const MAX_PREVIEW_COUNT: usize = 10;

/// Matches `{name}` tokens in templates.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Valid axis names, so every axis can be referenced from a template.
static AXIS_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// How combinations are drawn from the variation axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Walk the Cartesian product in order without repeats, wrapping when
    /// it is exhausted.
    Exhaustive,
    /// Pick one value per axis independently from a PRNG with this seed.
    Seeded(u64),
}

impl SamplingMode {
    /// Map the `unique` flag stored on a batch to a sampling mode.
    pub fn from_unique(unique: bool, seed: u64) -> Self {
        if unique {
            Self::Exhaustive
        } else {
            Self::Seeded(seed)
        }
    }
}

#[derive(Debug, Clone)]
struct Axis {
    name: String,
    values: Vec<String>,
}

/// A validated, ready-to-render batch prompt definition.
#[derive(Debug, Clone)]
pub struct PromptExpander {
    subject: String,
    template: String,
    /// All declared axes, including empty ones (they render as "").
    axes: Vec<Axis>,
    /// Indices into `axes` of the non-empty axes the template references.
    active: Vec<usize>,
}

impl PromptExpander {
    /// Validate the inputs and compile them into an expander.
    ///
    /// Fails with [`CoreError::Validation`] when the subject is blank, an
    /// axis name is not a valid placeholder name (or shadows `subject`),
    /// or the template references an axis that does not exist.
    pub fn new(
        subject: &str,
        variations: &Variations,
        template: Option<&str>,
    ) -> Result<Self, CoreError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(CoreError::Validation(
                "Target subject must not be empty".to_string(),
            ));
        }

        let mut axes = Vec::with_capacity(variations.len());
        for (name, raw_values) in variations {
            if !AXIS_NAME_RE.is_match(name) {
                return Err(CoreError::Validation(format!(
                    "Invalid variation axis name '{name}': use letters, digits and underscores"
                )));
            }
            if name == SUBJECT_PLACEHOLDER {
                return Err(CoreError::Validation(format!(
                    "'{SUBJECT_PLACEHOLDER}' is reserved and cannot be used as a variation axis"
                )));
            }
            axes.push(Axis {
                name: name.clone(),
                values: normalize_values(raw_values),
            });
        }

        let template = match template.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => default_template(&axes),
        };

        let referenced = placeholders(&template);
        for key in &referenced {
            if key != SUBJECT_PLACEHOLDER && !axes.iter().any(|a| &a.name == key) {
                return Err(CoreError::Validation(format!(
                    "Template references unknown variation axis '{key}'"
                )));
            }
        }

        let active = axes
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.values.is_empty() && referenced.contains(&a.name))
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            subject: subject.to_string(),
            template,
            axes,
            active,
        })
    }

    /// The template actually used, after falling back to the default.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Number of distinct prompts this expander can produce.
    ///
    /// Product of the sizes of the non-empty axes the template uses; 1 when
    /// there are none. Saturates at `u64::MAX`.
    pub fn max_unique_combinations(&self) -> u64 {
        self.active
            .iter()
            .map(|&i| self.axes[i].values.len() as u64)
            .fold(1u64, u64::saturating_mul)
    }

    /// Produce exactly `count` prompts.
    pub fn generate(&self, count: usize, mode: SamplingMode) -> Result<Vec<String>, CoreError> {
        validate_count(count, MAX_BATCH_IMAGES)?;

        let prompts: Vec<String> = match mode {
            SamplingMode::Exhaustive => {
                let total = self.max_unique_combinations();
                (0..count as u64)
                    .map(|i| self.render(&self.combination_at(i % total)))
                    .collect()
            }
            SamplingMode::Seeded(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..count)
                    .map(|_| {
                        let choice: Vec<usize> = self
                            .active
                            .iter()
                            .map(|&i| rng.random_range(0..self.axes[i].values.len()))
                            .collect();
                        self.render(&choice)
                    })
                    .collect()
            }
        };
        Ok(prompts)
    }

    /// Decode a position in the Cartesian product into one value index per
    /// active axis (last axis varies fastest).
    fn combination_at(&self, index: u64) -> Vec<usize> {
        let mut remaining = index;
        let mut choice = vec![0usize; self.active.len()];
        for (slot, &axis_idx) in self.active.iter().enumerate().rev() {
            let len = self.axes[axis_idx].values.len() as u64;
            choice[slot] = (remaining % len) as usize;
            remaining /= len;
        }
        choice
    }

    /// Substitute the subject and the chosen axis values into the template.
    fn render(&self, choice: &[usize]) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.template, |caps: &regex::Captures| {
                let key = &caps[1];
                if key == SUBJECT_PLACEHOLDER {
                    return self.subject.clone();
                }
                self.active
                    .iter()
                    .zip(choice)
                    .find(|(axis_idx, _)| self.axes[**axis_idx].name == key)
                    .map(|(axis_idx, value_idx)| self.axes[*axis_idx].values[*value_idx].clone())
                    // Referenced axes with no values render as empty text.
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Expand a batch definition into exactly `count` prompts.
pub fn generate_prompts(
    subject: &str,
    variations: &Variations,
    template: Option<&str>,
    count: usize,
    mode: SamplingMode,
) -> Result<Vec<String>, CoreError> {
    PromptExpander::new(subject, variations, template)?.generate(count, mode)
}

/// Preview the first `count` prompts (1 to [`MAX_PREVIEW_COUNT`]) a unique
/// batch with these inputs would generate. Nothing is persisted.
pub fn preview_prompts(
    subject: &str,
    variations: &Variations,
    template: Option<&str>,
    count: usize,
) -> Result<Vec<String>, CoreError> {
    validate_count(count, MAX_PREVIEW_COUNT)?;
    generate_prompts(subject, variations, template, count, SamplingMode::Exhaustive)
}

/// Number of distinct prompts a batch definition can produce.
pub fn estimate_unique_combinations(
    subject: &str,
    variations: &Variations,
    template: Option<&str>,
) -> Result<u64, CoreError> {
    Ok(PromptExpander::new(subject, variations, template)?.max_unique_combinations())
}

/// Ready-made variation axes offered to clients as a starting point.
pub fn default_variations() -> Variations {
    const PRESETS: &[(&str, &[&str])] = &[
        ("angle", &["front view", "side view", "top-down view", "close-up"]),
        ("environment", &["indoors", "outdoors", "studio backdrop", "urban street"]),
        ("lighting", &["natural daylight", "golden hour", "overcast", "low light"]),
        ("style", &["photorealistic", "film photo", "high detail"]),
    ];
    PRESETS
        .iter()
        .map(|(axis, values)| {
            (
                (*axis).to_string(),
                values.iter().map(|v| (*v).to_string()).collect(),
            )
        })
        .collect()
}

fn validate_count(count: usize, max: usize) -> Result<(), CoreError> {
    if count == 0 {
        return Err(CoreError::Validation(
            "Prompt count must be positive".to_string(),
        ));
    }
    if count > max {
        return Err(CoreError::Validation(format!(
            "Prompt count must be at most {max} (got {count})"
        )));
    }
    Ok(())
}

/// Trim values, drop blanks and duplicates, keep first-seen order.
fn normalize_values(raw: &[String]) -> Vec<String> {
    let mut values: Vec<String> = Vec::with_capacity(raw.len());
    for value in raw {
        let value = value.trim();
        if !value.is_empty() && !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
    values
}

fn default_template(axes: &[Axis]) -> String {
    let mut template = DEFAULT_TEMPLATE_PREFIX.to_string();
    for axis in axes.iter().filter(|a| !a.values.is_empty()) {
        template.push_str(", {");
        template.push_str(&axis.name);
        template.push('}');
    }
    template
}

fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;

    use super::*;

    fn vars(pairs: &[(&str, &[&str])]) -> Variations {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn distinct(prompts: &[String]) -> usize {
        prompts.iter().collect::<HashSet<_>>().len()
    }

    // -- validation --

    #[test]
    fn empty_subject_rejected() {
        let err = generate_prompts("  ", &Variations::new(), None, 1, SamplingMode::Exhaustive)
            .unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("subject"));
    }

    #[test]
    fn zero_count_rejected() {
        let err = generate_prompts("cat", &Variations::new(), None, 0, SamplingMode::Exhaustive)
            .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn count_above_batch_limit_rejected() {
        let err = generate_prompts(
            "cat",
            &Variations::new(),
            None,
            MAX_BATCH_IMAGES + 1,
            SamplingMode::Exhaustive,
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn template_with_unknown_axis_rejected() {
        let v = vars(&[("color", &["red"])]);
        let err = generate_prompts(
            "cat",
            &v,
            Some("{subject} in {lighting}"),
            1,
            SamplingMode::Exhaustive,
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("lighting"));
    }

    #[test]
    fn reserved_axis_name_rejected() {
        let v = vars(&[("subject", &["dog"])]);
        assert!(PromptExpander::new("cat", &v, None).is_err());
    }

    #[test]
    fn axis_name_with_spaces_rejected() {
        let v = vars(&[("time of day", &["dusk"])]);
        assert!(PromptExpander::new("cat", &v, None).is_err());
    }

    // -- combination counting --

    #[test]
    fn no_axes_means_one_combination() {
        let e = PromptExpander::new("cat", &Variations::new(), None).unwrap();
        assert_eq!(e.max_unique_combinations(), 1);
    }

    #[test]
    fn empty_axes_are_ignored_in_product() {
        let v = vars(&[("color", &["red", "blue"]), ("env", &[]), ("pose", &["a", "b", "c"])]);
        let e = PromptExpander::new("cat", &v, None).unwrap();
        assert_eq!(e.max_unique_combinations(), 6);
    }

    #[test]
    fn duplicate_and_blank_values_are_collapsed() {
        let v = vars(&[("color", &["red", " red ", "", "blue"])]);
        assert_eq!(estimate_unique_combinations("cat", &v, None).unwrap(), 2);
    }

    #[test]
    fn unreferenced_axes_do_not_multiply_combinations() {
        let v = vars(&[("color", &["red", "blue"]), ("env", &["indoor", "outdoor"])]);
        let e = PromptExpander::new("cat", &v, Some("{color} {subject}")).unwrap();
        assert_eq!(e.max_unique_combinations(), 2);
    }

    // -- rendering --

    #[test]
    fn all_axes_empty_yields_identical_bare_subject_prompts() {
        let v = vars(&[("color", &[]), ("env", &[])]);
        let prompts = generate_prompts("cat", &v, None, 3, SamplingMode::Exhaustive).unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().all(|p| p == "a high quality photo of cat"));
    }

    #[test]
    fn default_template_appends_axes_in_name_order() {
        let v = vars(&[("env", &["indoor"]), ("color", &["red"])]);
        let prompts = generate_prompts("cat", &v, None, 1, SamplingMode::Exhaustive).unwrap();
        assert_eq!(prompts, vec!["a high quality photo of cat, red, indoor"]);
    }

    #[test]
    fn custom_template_substitutes_subject_and_axes() {
        let v = vars(&[("color", &["red", "blue"])]);
        let prompts = generate_prompts(
            "cat",
            &v,
            Some("a {color} {subject}, studio light"),
            2,
            SamplingMode::Exhaustive,
        )
        .unwrap();
        assert_eq!(prompts, vec!["a red cat, studio light", "a blue cat, studio light"]);
    }

    #[test]
    fn referenced_empty_axis_renders_as_empty_text() {
        let v = vars(&[("color", &[])]);
        let prompts =
            generate_prompts("cat", &v, Some("{subject}[{color}]"), 1, SamplingMode::Exhaustive)
                .unwrap();
        assert_eq!(prompts, vec!["cat[]"]);
    }

    #[test]
    fn blank_template_falls_back_to_default() {
        let e = PromptExpander::new("cat", &Variations::new(), Some("   ")).unwrap();
        assert_eq!(e.template(), DEFAULT_TEMPLATE_PREFIX);
    }

    // -- enumeration order --

    #[test]
    fn exhaustive_order_turns_last_axis_fastest() {
        let v = vars(&[("a", &["1", "2"]), ("b", &["x", "y"])]);
        let prompts =
            generate_prompts("s", &v, Some("{a}{b}"), 4, SamplingMode::Exhaustive).unwrap();
        assert_eq!(prompts, vec!["1x", "1y", "2x", "2y"]);
    }

    #[test]
    fn unique_prompts_are_distinct_up_to_capacity() {
        let cases = [
            vars(&[("color", &["red", "blue", "green"])]),
            vars(&[("color", &["red", "blue"]), ("env", &["indoor", "outdoor", "space"])]),
            vars(&[("a", &["1", "2"]), ("b", &["3", "4"]), ("c", &["5", "6"]), ("d", &[])]),
        ];
        for v in &cases {
            let max = estimate_unique_combinations("cat", v, None).unwrap() as usize;
            for n in 1..=max {
                let prompts = generate_prompts("cat", v, None, n, SamplingMode::Exhaustive).unwrap();
                assert_eq!(prompts.len(), n);
                assert_eq!(distinct(&prompts), n, "variations {v:?}, n = {n}");
            }
        }
    }

    #[test]
    fn oversubscribed_expansion_wraps_around() {
        let v = vars(&[("color", &["red", "blue"]), ("env", &["indoor", "outdoor"])]);
        let prompts = generate_prompts("cat", &v, None, 10, SamplingMode::Exhaustive).unwrap();
        assert_eq!(prompts.len(), 10);
        assert_eq!(distinct(&prompts[..4]), 4);
        assert_eq!(prompts[4..8], prompts[..4]);
        assert_eq!(prompts[8..], prompts[..2]);
    }

    // -- preview --

    #[test]
    fn preview_matches_start_of_real_expansion() {
        let v = vars(&[("color", &["red", "blue"]), ("env", &["indoor", "outdoor"])]);
        for k in 1..=MAX_PREVIEW_COUNT {
            let preview = preview_prompts("cat", &v, Some("{color} {subject} {env}"), k).unwrap();
            let full = generate_prompts(
                "cat",
                &v,
                Some("{color} {subject} {env}"),
                50,
                SamplingMode::Exhaustive,
            )
            .unwrap();
            assert_eq!(preview[..], full[..k]);
        }
    }

    #[test]
    fn preview_of_cat_environments() {
        let v = vars(&[("env", &["indoor", "outdoor"])]);
        let prompts = preview_prompts("cat", &v, None, 2).unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p.contains("cat")));
    }

    #[test]
    fn preview_count_is_bounded() {
        let v = Variations::new();
        assert!(preview_prompts("cat", &v, None, 0).is_err());
        assert!(preview_prompts("cat", &v, None, MAX_PREVIEW_COUNT + 1).is_err());
    }

    // -- seeded sampling --

    #[test]
    fn seeded_sampling_is_reproducible() {
        let v = vars(&[("color", &["red", "blue", "green"]), ("env", &["indoor", "outdoor"])]);
        let a = generate_prompts("cat", &v, None, 20, SamplingMode::Seeded(42)).unwrap();
        let b = generate_prompts("cat", &v, None, 20, SamplingMode::Seeded(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert!(a.iter().all(|p| p.starts_with("a high quality photo of cat, ")));
    }

    #[test]
    fn default_variations_are_valid_axes() {
        let presets = default_variations();
        assert_eq!(presets.len(), 4);
        let expander = PromptExpander::new("cat", &presets, None).unwrap();
        assert_eq!(expander.max_unique_combinations(), 4 * 4 * 4 * 3);
    }

    #[test]
    fn sampling_mode_from_unique_flag() {
        assert_eq!(SamplingMode::from_unique(true, 7), SamplingMode::Exhaustive);
        assert_eq!(SamplingMode::from_unique(false, 7), SamplingMode::Seeded(7));
    }
}
