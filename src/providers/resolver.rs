use thiserror::Error;
use url::Url;

use crate::providers::identity::{Provider, SourceIdentity};

const HOST_ALIASES: &[(&str, &str)] = &[("www.doctolib.fr", "partners.doctolib.fr")];

const PROVIDER_HOSTS: &[(&str, Provider)] = &[("partners.doctolib.fr", Provider::Doctolib)];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown provider: {url}")]
    UnknownProvider { url: String, host: String },
}

pub fn resolve(booking_url: Option<&str>) -> Result<Option<SourceIdentity>, ResolveError> {
    let Some(raw) = booking_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let Ok(url) = Url::parse(raw) else {
        return Ok(None);
    };
    let Some(host) = url.host_str() else {
        return Ok(None);
    };
    let Some(id) = last_path_segment(&url) else {
        return Ok(None);
    };

    let host = canonical_host(host);
    match PROVIDER_HOSTS.iter().find(|(known, _)| *known == host) {
        Some((_, provider)) => Ok(Some(SourceIdentity::new(*provider, id))),
        None => Err(ResolveError::UnknownProvider {
            url: raw.to_string(),
            host: host.to_string(),
        }),
    }
}

fn canonical_host(host: &str) -> &str {
    HOST_ALIASES
        .iter()
        .find(|(alias, _)| *alias == host)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(host)
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::{resolve, ResolveError};
    use crate::providers::identity::{Provider, SourceIdentity};

    #[test]
    fn partner_host_resolves_to_last_segment() {
        let identity = resolve(Some(
            "https://partners.doctolib.fr/centre-de-sante/paris/centre-x?pid=practice-1",
        ))
        .expect("resolves")
        .expect("identity");
        assert_eq!(identity, SourceIdentity::new(Provider::Doctolib, "centre-x"));
    }

    #[test]
    fn public_alias_matches_partner_host() {
        let public = resolve(Some("https://www.doctolib.fr/hopital-public/dijon/chu-dijon/"))
            .expect("resolves");
        let partner = resolve(Some("https://partners.doctolib.fr/hopital-public/dijon/chu-dijon"))
            .expect("resolves");
        assert_eq!(public, partner);
        assert_eq!(public.expect("identity").to_string(), "doctolib://chu-dijon");
    }

    #[test]
    fn missing_or_incomplete_urls_are_silently_skipped() {
        assert_eq!(resolve(None), Ok(None));
        assert_eq!(resolve(Some("   ")), Ok(None));
        assert_eq!(resolve(Some("not a url")), Ok(None));
        assert_eq!(resolve(Some("https://partners.doctolib.fr/")), Ok(None));
    }

    #[test]
    fn unknown_hosts_are_reported() {
        let err = resolve(Some("https://www.keldoc.com/centre/abc")).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownProvider {
                url: "https://www.keldoc.com/centre/abc".to_string(),
                host: "www.keldoc.com".to_string(),
            }
        );
    }
}
