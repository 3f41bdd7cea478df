//! Catalog entries and their split into priority-ordered stages.

use tracing::info;

use crate::config::{GeneratorConfig, StageConfig};
use crate::generate::stages::Stage;
use crate::model::PackageDescriptor;
use crate::registrants::ArtifactHubClient;

/// Priority tier of a catalog package; earlier tiers run in earlier stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    PriorityRepo,
    Cncf,
    Official,
    Verified,
    Unverified,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::PriorityRepo,
        Tier::Cncf,
        Tier::Official,
        Tier::Verified,
        Tier::Unverified,
    ];

    pub fn classify(
        repository: &str,
        cncf: bool,
        official: bool,
        verified_publisher: bool,
        priority_repos: &[String],
    ) -> Self {
        if priority_repos.iter().any(|r| r.eq_ignore_ascii_case(repository)) {
            Tier::PriorityRepo
        } else if cncf {
            Tier::Cncf
        } else if official {
            Tier::Official
        } else if verified_publisher {
            Tier::Verified
        } else {
            Tier::Unverified
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::PriorityRepo => "priority-repo",
            Tier::Cncf => "cncf",
            Tier::Official => "official",
            Tier::Verified => "verified",
            Tier::Unverified => "unverified",
        }
    }
}

/// One package listed by the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub descriptor: PackageDescriptor,
    pub repository: String,
    pub tier: Tier,
}

/// Groups entries by tier into stages, dropping empty tiers.
pub fn into_stages(entries: Vec<CatalogEntry>, config: &StageConfig) -> Vec<Stage<PackageDescriptor>> {
    let mut buckets: Vec<Vec<PackageDescriptor>> = vec![Vec::new(); Tier::ALL.len()];
    for entry in entries {
        buckets[entry.tier as usize].push(entry.descriptor);
    }

    Tier::ALL
        .iter()
        .zip(buckets)
        .filter(|(_, items)| !items.is_empty())
        .map(|(tier, items)| Stage::new(tier.as_str(), items, config.chunk_size, config.workers))
        .collect()
}

/// Lists the ArtifactHub catalog with the configured paging and priority
/// repositories, then splits it into stages.
pub async fn load_stages(
    client: &ArtifactHubClient,
    config: &GeneratorConfig,
) -> Vec<Stage<PackageDescriptor>> {
    let entries = client
        .list_catalog(
            config.artifacthub.page_size,
            config.artifacthub.max_pages,
            &config.stages.priority_repos,
        )
        .await;
    let stages = into_stages(entries, &config.stages);
    info!(stages = stages.len(), "Catalog staged");
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(name: &str, tier: Tier) -> CatalogEntry {
        CatalogEntry {
            descriptor: PackageDescriptor::new("artifacthub", name, name, true),
            repository: "repo".to_string(),
            tier,
        }
    }

    #[test]
    fn test_classify_precedence() {
        let priority = vec!["Bitnami".to_string()];
        assert_eq!(Tier::classify("bitnami", true, true, true, &priority), Tier::PriorityRepo);
        assert_eq!(Tier::classify("x", true, true, true, &priority), Tier::Cncf);
        assert_eq!(Tier::classify("x", false, true, true, &priority), Tier::Official);
        assert_eq!(Tier::classify("x", false, false, true, &priority), Tier::Verified);
        assert_eq!(Tier::classify("x", false, false, false, &priority), Tier::Unverified);
    }

    #[test]
    fn test_stages_follow_tier_order_and_skip_empty() {
        let entries = vec![
            entry("u1", Tier::Unverified),
            entry("c1", Tier::Cncf),
            entry("p1", Tier::PriorityRepo),
            entry("c2", Tier::Cncf),
        ];
        let stages = into_stages(entries, &StageConfig::default());

        let names: Vec<_> = stages.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["priority-repo", "cncf", "unverified"]);
        assert_eq!(stages[1].len(), 2);
        assert_eq!(stages[1].workers(), 9);
    }

    #[tokio::test]
    async fn test_load_stages_uses_configured_paging_and_priorities() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/packages/search"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "packages": [
                    {"name": "nginx", "version": "1.0.0", "repository": {"name": "bitnami"}},
                    {"name": "prometheus", "version": "2.0.0",
                     "repository": {"name": "prometheus-community", "cncf": true}}
                ]
            })))
            .mount(&server)
            .await;

        let config = GeneratorConfig::from_toml_str(&format!(
            r#"
            [stages]
            workers = 3
            priority_repos = ["bitnami"]

            [artifacthub]
            base_url = "{}"
            page_size = 5
            "#,
            server.uri()
        ))
        .unwrap();
        let client = ArtifactHubClient::from_config(reqwest::Client::new(), &config);

        let stages = load_stages(&client, &config).await;

        let names: Vec<_> = stages.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["priority-repo", "cncf"]);
        assert_eq!(stages[0].workers(), 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
