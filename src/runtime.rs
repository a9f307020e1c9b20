use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read runtime catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse runtime catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate runtime identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("runtime catalog is empty")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandTemplate {
    pub fn resolve(&self, main_file: &str) -> ResolvedCommand {
        let stem = file_stem(main_file);
        ResolvedCommand {
            program: expand(&self.program, main_file, stem),
            args: self
                .args
                .iter()
                .map(|arg| expand(arg, main_file, stem))
                .collect(),
            env: self
                .env
                .iter()
                .map(|(key, value)| (key.clone(), expand(value, main_file, stem)))
                .collect(),
        }
    }
}

fn expand(input: &str, main_file: &str, stem: &str) -> String {
    input.replace("{file}", main_file).replace("{stem}", stem)
}

fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
    pub language: String,
    pub version: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub extension: String,
    #[serde(default)]
    pub compile: Vec<CommandTemplate>,
    pub run: CommandTemplate,
}

impl RuntimeDescriptor {
    pub fn has_compile_stage(&self) -> bool {
        !self.compile.is_empty()
    }

    pub fn file_name_for(&self, index: usize) -> String {
        if index == 0 {
            format!("main.{}", self.extension)
        } else {
            format!("main{index}.{}", self.extension)
        }
    }
}

#[derive(Debug)]
pub struct RuntimeRegistry {
    descriptors: Vec<RuntimeDescriptor>,
}

impl RuntimeRegistry {
    pub fn new(descriptors: Vec<RuntimeDescriptor>) -> Result<Self, RegistryError> {
        if descriptors.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            for identifier in
                std::iter::once(&descriptor.language).chain(descriptor.aliases.iter())
            {
                if !seen.insert(identifier.clone()) {
                    return Err(RegistryError::DuplicateIdentifier(identifier.clone()));
                }
            }
        }
        Ok(Self { descriptors })
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(builtin_descriptors())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let descriptors = serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(descriptors)
    }

    pub fn resolve(&self, identifier: &str) -> Option<&RuntimeDescriptor> {
        self.descriptors.iter().find(|descriptor| {
            descriptor.language == identifier
                || descriptor.aliases.iter().any(|alias| alias == identifier)
        })
    }

    pub fn descriptors(&self) -> &[RuntimeDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn template(program: &str, args: &[&str]) -> CommandTemplate {
    CommandTemplate {
        program: program.to_string(),
        args: args.iter().map(|arg| arg.to_string()).collect(),
        env: Vec::new(),
    }
}

fn builtin_descriptors() -> Vec<RuntimeDescriptor> {
    vec![
        RuntimeDescriptor {
            language: "python".to_string(),
            version: "3.10.0".to_string(),
            aliases: vec!["py".to_string(), "python3".to_string()],
            extension: "py".to_string(),
            compile: Vec::new(),
            run: template("python3", &["{file}"]),
        },
        RuntimeDescriptor {
            language: "javascript".to_string(),
            version: "18.15.0".to_string(),
            aliases: vec!["js".to_string(), "node".to_string()],
            extension: "js".to_string(),
            compile: Vec::new(),
            run: template("node", &["{file}"]),
        },
        RuntimeDescriptor {
            language: "go".to_string(),
            version: "1.21.0".to_string(),
            aliases: vec!["golang".to_string()],
            extension: "go".to_string(),
            compile: vec![
                template("go", &["mod", "init", "sandbox"]),
                template("go", &["build", "-o", "main", "{file}"]),
            ],
            run: template("./main", &[]),
        },
        RuntimeDescriptor {
            language: "java".to_string(),
            version: "17.0.0".to_string(),
            aliases: Vec::new(),
            extension: "java".to_string(),
            compile: vec![template("javac", &["{file}"])],
            run: template("java", &["{stem}"]),
        },
        RuntimeDescriptor {
            language: "c".to_string(),
            version: "12.0.0".to_string(),
            aliases: vec!["gcc".to_string()],
            extension: "c".to_string(),
            compile: vec![template("gcc", &["{file}", "-O2", "-o", "main"])],
            run: template("./main", &[]),
        },
        RuntimeDescriptor {
            language: "cpp".to_string(),
            version: "12.0.0".to_string(),
            aliases: vec!["c++".to_string(), "g++".to_string()],
            extension: "cpp".to_string(),
            compile: vec![template("g++", &["{file}", "-O2", "-o", "main"])],
            run: template("./main", &[]),
        },
        RuntimeDescriptor {
            language: "rust".to_string(),
            version: "1.76.0".to_string(),
            aliases: vec!["rs".to_string()],
            extension: "rs".to_string(),
            compile: vec![template("rustc", &["-O", "{file}", "-o", "main"])],
            run: template("./main", &[]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::{CommandTemplate, RegistryError, RuntimeDescriptor, RuntimeRegistry, template};

    fn shell_descriptor(language: &str, aliases: &[&str]) -> RuntimeDescriptor {
        RuntimeDescriptor {
            language: language.to_string(),
            version: "1.0.0".to_string(),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            extension: "sh".to_string(),
            compile: Vec::new(),
            run: template("sh", &["{file}"]),
        }
    }

    #[test]
    fn resolves_by_language_and_alias() {
        let registry = RuntimeRegistry::builtin().unwrap();

        assert_eq!(registry.resolve("python").unwrap().language, "python");
        assert_eq!(registry.resolve("py").unwrap().language, "python");
        assert_eq!(registry.resolve("node").unwrap().language, "javascript");
        assert_eq!(registry.resolve("golang").unwrap().language, "go");
        assert!(registry.resolve("cobol").is_none());
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let result = RuntimeRegistry::new(vec![
            shell_descriptor("shell", &["sh"]),
            shell_descriptor("dash", &["sh"]),
        ]);

        match result {
            Err(RegistryError::DuplicateIdentifier(identifier)) => assert_eq!(identifier, "sh"),
            other => panic!("expected duplicate identifier error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_catalog() {
        assert!(matches!(
            RuntimeRegistry::new(Vec::new()),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn expands_file_and_stem_placeholders() {
        let compile = template("gcc", &["{file}", "-O2", "-o", "main"]);
        let resolved = compile.resolve("main.c");
        assert_eq!(resolved.program, "gcc");
        assert_eq!(resolved.args, vec!["main.c", "-O2", "-o", "main"]);

        let run = template("java", &["{stem}"]);
        let resolved = run.resolve("Main.java");
        assert_eq!(resolved.args, vec!["Main"]);
    }

    #[test]
    fn expands_placeholders_in_env_values() {
        let command = CommandTemplate {
            program: "sh".to_string(),
            args: vec!["{file}".to_string()],
            env: vec![("SOURCE".to_string(), "{file}".to_string())],
        };
        let resolved = command.resolve("main.sh");
        assert_eq!(resolved.env, vec![("SOURCE".to_string(), "main.sh".to_string())]);
    }

    #[test]
    fn derives_indexed_fallback_names() {
        let registry = RuntimeRegistry::builtin().unwrap();
        let python = registry.resolve("python").unwrap();

        assert_eq!(python.file_name_for(0), "main.py");
        assert_eq!(python.file_name_for(1), "main1.py");
        assert_eq!(python.file_name_for(7), "main7.py");
    }

    #[test]
    fn builtin_catalog_marks_compiled_languages() {
        let registry = RuntimeRegistry::builtin().unwrap();

        assert!(!registry.resolve("python").unwrap().has_compile_stage());
        assert!(!registry.resolve("javascript").unwrap().has_compile_stage());
        assert!(registry.resolve("c").unwrap().has_compile_stage());
        assert!(registry.resolve("java").unwrap().has_compile_stage());
        assert_eq!(registry.resolve("go").unwrap().compile.len(), 2);
    }

    #[test]
    fn loads_catalog_override_from_json() {
        let path = std::env::temp_dir().join(format!(
            "runbox-catalog-{}.json",
            uuid::Uuid::new_v4().as_simple()
        ));
        std::fs::write(
            &path,
            r#"[{
                "language": "shell",
                "version": "0.1.0",
                "aliases": ["sh"],
                "extension": "sh",
                "run": { "program": "sh", "args": ["{file}"] }
            }]"#,
        )
        .unwrap();

        let registry = RuntimeRegistry::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(registry.len(), 1);
        let descriptor = registry.resolve("sh").unwrap();
        assert_eq!(descriptor.language, "shell");
        assert!(descriptor.compile.is_empty());
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let path = std::env::temp_dir().join("runbox-definitely-missing-catalog.json");
        assert!(matches!(
            RuntimeRegistry::from_json_file(&path),
            Err(RegistryError::Read { .. })
        ));
    }
}
