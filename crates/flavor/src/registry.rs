use std::{collections::BTreeMap, path::Path};

use convert::{Content, ConvertContext};
use http::header::CONTENT_LENGTH;

use crate::{Flavor, FlavorError, Stage, definition::FlavorDefinition};

/// The gateway's own wire format. Every cross-flavor conversion passes through it.
pub const CANONICAL_FLAVOR: &str = "aog";

const BUILT_IN: [(&str, &str); 5] = [
    ("aog", include_str!("../flavors/aog.yaml")),
    ("deepseek", include_str!("../flavors/deepseek.yaml")),
    ("ollama", include_str!("../flavors/ollama.yaml")),
    ("openai", include_str!("../flavors/openai.yaml")),
    ("tencent", include_str!("../flavors/tencent.yaml")),
];

/// Every flavor known to the gateway, loaded once at startup.
#[derive(Debug)]
pub struct FlavorRegistry {
    flavors: BTreeMap<String, Flavor>,
}

impl FlavorRegistry {
    /// Load the built-in flavors only.
    pub fn builtin() -> Result<Self, FlavorError> {
        Self::load(None)
    }

    /// Load the built-in flavors, then every `*.yaml` / `*.yml` file in `dir`.
    ///
    /// A file whose stem matches a built-in flavor replaces it.
    pub fn load(dir: Option<&Path>) -> Result<Self, FlavorError> {
        let mut sources: BTreeMap<String, String> = BUILT_IN
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();

        if let Some(dir) = dir {
            let io_error = |source| FlavorError::Io {
                path: dir.to_path_buf(),
                source,
            };

            for entry in std::fs::read_dir(dir).map_err(io_error)? {
                let path = entry.map_err(io_error)?.path();

                let is_yaml = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml");

                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };

                if !is_yaml || !path.is_file() {
                    continue;
                }

                let source = std::fs::read_to_string(&path).map_err(|source| FlavorError::Io {
                    path: path.clone(),
                    source,
                })?;

                log::debug!("loading flavor definition {}", path.display());
                sources.insert(stem.to_string(), source);
            }
        }

        Self::from_sources(sources)
    }

    /// Build from `(file stem, yaml)` pairs. The flavor name must match the stem.
    pub fn from_sources<I, K, V>(sources: I) -> Result<Self, FlavorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut flavors = BTreeMap::new();

        for (file, source) in sources {
            let file = file.into();

            let definition: FlavorDefinition =
                serde_yaml::from_str(source.as_ref()).map_err(|source| FlavorError::Yaml {
                    file: file.clone(),
                    source,
                })?;

            if definition.name != file {
                return Err(FlavorError::NameMismatch {
                    file,
                    name: definition.name,
                });
            }

            let flavor = Flavor::new(definition)?;

            log::debug!("flavor {} provides {} services", flavor.name(), flavor.services().count());
            flavors.insert(file, flavor);
        }

        if !flavors.contains_key(CANONICAL_FLAVOR) {
            return Err(FlavorError::MissingCanonical(CANONICAL_FLAVOR.to_string()));
        }

        Ok(Self { flavors })
    }

    pub fn get(&self, name: &str) -> Result<&Flavor, FlavorError> {
        self.flavors
            .get(name)
            .ok_or_else(|| FlavorError::UnknownFlavor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flavors.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flavor> {
        self.flavors.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flavors.keys().map(String::as_str)
    }

    pub fn canonical(&self) -> &Flavor {
        // presence is checked in `from_sources`
        &self.flavors[CANONICAL_FLAVOR]
    }

    /// Convert `content` from one flavor to another through the canonical form.
    ///
    /// `Content-Length` is always removed. Equal flavors return the content otherwise
    /// untouched. `on_canonical` sees the canonical midpoint of a real conversion.
    #[allow(clippy::too_many_arguments)]
    pub fn convert(
        &self,
        from: &str,
        to: &str,
        service: &str,
        stage: Stage,
        mut content: Content,
        ctx: &ConvertContext,
        on_canonical: impl FnOnce(&Content),
    ) -> Result<Content, FlavorError> {
        content.headers.remove(CONTENT_LENGTH);

        if from == to {
            return Ok(content);
        }

        if from != CANONICAL_FLAVOR {
            content = self.get(from)?.convert(service, stage.to_canonical(), content, ctx)?;
        }

        on_canonical(&content);

        if to != CANONICAL_FLAVOR {
            content = self.get(to)?.convert(service, stage.from_canonical(), content, ctx)?;
        }

        Ok(content)
    }
}
