use std::{collections::BTreeMap, fmt};

use convert::{Content, ConvertContext, Pipeline};

use crate::{
    Endpoint, FlavorError,
    definition::{ConversionDefinition, FlavorDefinition, Protocol, ServiceDefinition},
};

/// Which payload is being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Request,
    Response,
    StreamResponse,
}

impl Stage {
    pub fn to_canonical(self) -> Conversion {
        match self {
            Stage::Request => Conversion::RequestToCanonical,
            Stage::Response => Conversion::ResponseToCanonical,
            Stage::StreamResponse => Conversion::StreamResponseToCanonical,
        }
    }

    pub fn from_canonical(self) -> Conversion {
        match self {
            Stage::Request => Conversion::RequestFromCanonical,
            Stage::Response => Conversion::ResponseFromCanonical,
            Stage::StreamResponse => Conversion::StreamResponseFromCanonical,
        }
    }
}

/// The six conversion directions a flavor service declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    RequestToCanonical,
    RequestFromCanonical,
    ResponseToCanonical,
    ResponseFromCanonical,
    StreamResponseToCanonical,
    StreamResponseFromCanonical,
}

impl Conversion {
    pub const ALL: [Conversion; 6] = [
        Conversion::RequestToCanonical,
        Conversion::RequestFromCanonical,
        Conversion::ResponseToCanonical,
        Conversion::ResponseFromCanonical,
        Conversion::StreamResponseToCanonical,
        Conversion::StreamResponseFromCanonical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Conversion::RequestToCanonical => "request_to_canonical",
            Conversion::RequestFromCanonical => "request_from_canonical",
            Conversion::ResponseToCanonical => "response_to_canonical",
            Conversion::ResponseFromCanonical => "response_from_canonical",
            Conversion::StreamResponseToCanonical => "stream_response_to_canonical",
            Conversion::StreamResponseFromCanonical => "stream_response_from_canonical",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn definition(self, service: &ServiceDefinition) -> &ConversionDefinition {
        match self {
            Conversion::RequestToCanonical => &service.request_to_canonical,
            Conversion::RequestFromCanonical => &service.request_from_canonical,
            Conversion::ResponseToCanonical => &service.response_to_canonical,
            Conversion::ResponseFromCanonical => &service.response_from_canonical,
            Conversion::StreamResponseToCanonical => &service.stream_response_to_canonical,
            Conversion::StreamResponseFromCanonical => &service.stream_response_from_canonical,
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded flavor: its definition plus ready-to-run pipelines for every service.
#[derive(Debug)]
pub struct Flavor {
    name: String,
    version: String,
    services: BTreeMap<String, FlavorService>,
}

#[derive(Debug)]
pub struct FlavorService {
    definition: ServiceDefinition,
    endpoints: Vec<Endpoint>,
    pipelines: Vec<Pipeline>,
}

const AUTH_TYPES: [&str; 3] = ["none", "apikey", "token"];

impl Flavor {
    pub(crate) fn new(definition: FlavorDefinition) -> Result<Self, FlavorError> {
        let FlavorDefinition { version, name, services } = definition;
        let mut built = BTreeMap::new();

        for (service, mut definition) in services {
            let mut endpoints = Vec::with_capacity(definition.endpoints.len());

            for endpoint in &definition.endpoints {
                let parsed = Endpoint::parse(endpoint).ok_or_else(|| FlavorError::MalformedEndpoint {
                    flavor: name.clone(),
                    service: service.clone(),
                    endpoint: endpoint.clone(),
                })?;

                endpoints.push(parsed);
            }

            if definition.auth_type.is_empty() {
                definition.auth_type = "none".to_string();
            }

            if !AUTH_TYPES.contains(&definition.auth_type.as_str()) {
                return Err(FlavorError::AuthType {
                    flavor: name.clone(),
                    service,
                    auth_type: definition.auth_type,
                });
            }

            if definition.extra_headers.trim().is_empty() {
                definition.extra_headers = "{}".to_string();
            }

            if let Err(error) = serde_json::from_str::<BTreeMap<String, String>>(&definition.extra_headers) {
                return Err(FlavorError::ExtraHeaders {
                    flavor: name.clone(),
                    service,
                    message: error.to_string(),
                });
            }

            let mut pipelines = Vec::with_capacity(Conversion::ALL.len());

            for conversion in Conversion::ALL {
                let steps = &conversion.definition(&definition).conversion;

                let pipeline = Pipeline::new(steps).map_err(|source| FlavorError::Pipeline {
                    flavor: name.clone(),
                    service: service.clone(),
                    conversion,
                    source,
                })?;

                pipelines.push(pipeline);
            }

            built.insert(
                service,
                FlavorService {
                    definition,
                    endpoints,
                    pipelines,
                },
            );
        }

        Ok(Self {
            name,
            version,
            services: built,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &FlavorService)> {
        self.services.iter().map(|(name, service)| (name.as_str(), service))
    }

    pub fn service(&self, name: &str) -> Result<&FlavorService, FlavorError> {
        self.services.get(name).ok_or_else(|| FlavorError::UnknownService {
            flavor: self.name.clone(),
            service: name.to_string(),
        })
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Run one of the service's pipelines.
    pub fn convert(
        &self,
        service: &str,
        conversion: Conversion,
        content: Content,
        ctx: &ConvertContext,
    ) -> Result<Content, FlavorError> {
        let service = self.service(service)?;

        log::debug!("converting with flavor {} ({conversion})", self.name);

        Ok(service.pipeline(conversion).convert(content, ctx)?)
    }
}

impl FlavorService {
    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_http(&self) -> bool {
        self.definition.protocol == Protocol::Http
    }

    pub fn install_raw_routes(&self) -> bool {
        self.definition.install_raw_routes
    }

    pub fn default_model(&self) -> &str {
        &self.definition.default_model
    }

    pub fn auth_type(&self) -> &str {
        &self.definition.auth_type
    }

    pub fn is_multi_segment(&self) -> bool {
        self.definition.request_segments > 1
    }

    pub fn pipeline(&self, conversion: Conversion) -> &Pipeline {
        &self.pipelines[conversion.index()]
    }

    /// Strings sent before the first chunk of a stream written in this flavor.
    pub fn stream_prologue(&self) -> &[String] {
        &self.definition.stream_response_from_canonical.prologue
    }

    /// Strings sent after the last chunk of a stream written in this flavor.
    pub fn stream_epilogue(&self) -> &[String] {
        &self.definition.stream_response_from_canonical.epilogue
    }
}
