use std::collections::HashSet;

use crate::Id;

/// Generates unique names for wires, registers, and instances. Names
/// already in the generated set get a numeric suffix appended.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    generated_names: HashSet<Id>,
}

impl NameGenerator {
    /// Construct a generator that will avoid all of `names`.
    pub fn with_prev_defined_names(names: HashSet<Id>) -> Self {
        NameGenerator {
            generated_names: names,
        }
    }

    /// Add generated names to the set of defined names.
    pub fn add_names(&mut self, names: impl IntoIterator<Item = Id>) {
        self.generated_names.extend(names)
    }

    /// Returns a unique name derived from `prefix`: the prefix itself when
    /// unused, otherwise the prefix with the smallest unused numeric suffix.
    pub fn gen_name<S>(&mut self, prefix: S) -> Id
    where
        S: Into<Id> + ToString + Clone,
    {
        let name: Id = prefix.clone().into();
        if !self.generated_names.contains(&name) {
            self.generated_names.insert(name);
            return name;
        }
        let mut suffix = 0;
        loop {
            let candidate =
                Id::new(format!("{}{}", prefix.to_string(), suffix));
            if !self.generated_names.contains(&candidate) {
                self.generated_names.insert(candidate);
                return candidate;
            }
            suffix += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_pass_through() {
        let mut namegen = NameGenerator::default();
        assert_eq!(namegen.gen_name("foo"), Id::new("foo"));
        assert_eq!(namegen.gen_name("bar"), Id::new("bar"));
    }

    #[test]
    fn collisions_get_suffixes() {
        let mut namegen = NameGenerator::default();
        assert_eq!(namegen.gen_name("foo"), Id::new("foo"));
        assert_eq!(namegen.gen_name("foo"), Id::new("foo0"));
        assert_eq!(namegen.gen_name("foo"), Id::new("foo1"));
    }

    #[test]
    fn avoids_previously_defined() {
        let prev = [Id::new("clk"), Id::new("out")].into_iter().collect();
        let mut namegen = NameGenerator::with_prev_defined_names(prev);
        assert_eq!(namegen.gen_name("clk"), Id::new("clk0"));
        assert_eq!(namegen.gen_name("out"), Id::new("out0"));
    }
}
