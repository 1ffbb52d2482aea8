//! Language recipes and the registry that resolves them

use crate::{Result, SandboxError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// A program and its arguments, resolved against a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds a command for a workspace directory
pub type CommandBuilder = fn(&Path) -> CommandSpec;

/// How to materialize and run source code for one language
#[derive(Clone, Copy)]
pub struct LanguageRecipe {
    /// Canonical language name
    pub name: &'static str,
    /// Other identifiers accepted for this language
    pub aliases: &'static [&'static str],
    /// File name the source is written as; tooling infers behavior from the extension
    pub source_file: &'static str,
    /// Optional step run before `run`, in the same workspace
    pub build: Option<CommandBuilder>,
    pub run: CommandBuilder,
}

impl fmt::Debug for LanguageRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageRecipe")
            .field("name", &self.name)
            .field("source_file", &self.source_file)
            .field("has_build", &self.build.is_some())
            .finish_non_exhaustive()
    }
}

impl LanguageRecipe {
    #[must_use]
    pub fn build_command(&self, workspace: &Path) -> Option<CommandSpec> {
        self.build.map(|build| build(workspace))
    }

    #[must_use]
    pub fn run_command(&self, workspace: &Path) -> CommandSpec {
        (self.run)(workspace)
    }
}

fn python_run(_: &Path) -> CommandSpec {
    CommandSpec::new("python3", ["-u", "main.py"])
}

fn node_run(_: &Path) -> CommandSpec {
    CommandSpec::new("node", ["main.js"])
}

fn shell_run(_: &Path) -> CommandSpec {
    CommandSpec::new("sh", ["main.sh"])
}

pub const PYTHON: LanguageRecipe = LanguageRecipe {
    name: "python",
    aliases: &["py", "python3"],
    source_file: "main.py",
    build: None,
    run: python_run,
};

pub const JAVASCRIPT: LanguageRecipe = LanguageRecipe {
    name: "javascript",
    aliases: &["js", "node", "nodejs"],
    source_file: "main.js",
    build: None,
    run: node_run,
};

pub const SHELL: LanguageRecipe = LanguageRecipe {
    name: "shell",
    aliases: &["sh"],
    source_file: "main.sh",
    build: None,
    run: shell_run,
};

static DEFAULT_REGISTRY: Lazy<LanguageRegistry> = Lazy::new(|| {
    LanguageRegistry::builder()
        .recipe(PYTHON)
        .recipe(JAVASCRIPT)
        .recipe(SHELL)
        .build()
});

/// Immutable lookup table from language identifier to recipe.
///
/// Lookups are case-insensitive and accept aliases. Once built, a registry is
/// never modified; share it behind an `Arc` or use [`LanguageRegistry::global`].
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    recipes: Vec<LanguageRecipe>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    #[must_use]
    pub fn builder() -> LanguageRegistryBuilder {
        LanguageRegistryBuilder::default()
    }

    /// The built-in registry, created on first use
    #[must_use]
    pub fn global() -> &'static Self {
        &DEFAULT_REGISTRY
    }

    pub fn resolve(&self, language: &str) -> Result<LanguageRecipe> {
        self.index
            .get(&language.trim().to_ascii_lowercase())
            .map(|&i| self.recipes[i])
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language.to_string()))
    }

    /// Recipes in registration order
    pub fn recipes(&self) -> impl Iterator<Item = &LanguageRecipe> {
        self.recipes.iter()
    }
}

#[derive(Debug, Default)]
pub struct LanguageRegistryBuilder {
    registry: LanguageRegistry,
}

impl LanguageRegistryBuilder {
    /// Add a recipe. Identifiers already taken by an earlier recipe keep
    /// pointing at the earlier one.
    #[must_use]
    pub fn recipe(mut self, recipe: LanguageRecipe) -> Self {
        let position = self.registry.recipes.len();
        self.registry.recipes.push(recipe);

        for key in std::iter::once(recipe.name).chain(recipe.aliases.iter().copied()) {
            let key = key.to_ascii_lowercase();
            if self.registry.index.contains_key(&key) {
                tracing::warn!(language = %key, "duplicate language identifier ignored");
                continue;
            }
            self.registry.index.insert(key, position);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> LanguageRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.resolve("Python").unwrap().name, "python");
        assert_eq!(registry.resolve("JAVASCRIPT").unwrap().name, "javascript");
        assert_eq!(registry.resolve("  sh ").unwrap().name, "shell");
    }

    #[test]
    fn resolves_aliases() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.resolve("py").unwrap().source_file, "main.py");
        assert_eq!(registry.resolve("node").unwrap().source_file, "main.js");
    }

    #[test]
    fn unknown_language_is_unsupported() {
        let err = LanguageRegistry::global().resolve("ruby").unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedLanguage(ref l) if l == "ruby"));
    }

    #[test]
    fn run_command_uses_canonical_file_name() {
        let recipe = LanguageRegistry::global().resolve("python").unwrap();
        let cmd = recipe.run_command(Path::new("/tmp/ws"));
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args.last().map(String::as_str), Some(recipe.source_file));
        assert!(recipe.build_command(Path::new("/tmp/ws")).is_none());
    }

    #[test]
    fn first_registration_wins_on_conflict() {
        let other = LanguageRecipe {
            name: "other",
            aliases: &["py"],
            ..SHELL
        };
        let registry = LanguageRegistry::builder().recipe(PYTHON).recipe(other).build();
        assert_eq!(registry.resolve("py").unwrap().name, "python");
        assert_eq!(registry.resolve("other").unwrap().name, "other");
        assert_eq!(registry.recipes().count(), 2);
    }

    #[test]
    fn command_display_joins_arguments() {
        let cmd = CommandSpec::new("node", ["main.js"]);
        assert_eq!(cmd.to_string(), "node main.js");
    }
}
