//! Mapping from request paths to the entity type they mutate.

use serde::Deserialize;
use tracing::debug;

/// One configured route, e.g. `/api/projects/:id/tasks/*` -> `tasks`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
  pub pattern: String,
  pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Param,
  Rest,
}

#[derive(Debug, Clone)]
struct Route {
  segments: Vec<Segment>,
  entity_type: String,
}

impl Route {
  fn parse(config: &RouteConfig) -> Self {
    let segments = path_segments(&config.pattern)
      .map(|s| match s {
        "*" => Segment::Rest,
        s if s.starts_with(':') => Segment::Param,
        s => Segment::Literal(s.to_string()),
      })
      .collect();

    Self {
      segments,
      entity_type: config.entity_type.clone(),
    }
  }

  fn matches(&self, path: &[&str]) -> bool {
    let mut i = 0;
    for segment in &self.segments {
      match segment {
        Segment::Rest => return true,
        Segment::Param => {
          if i >= path.len() {
            return false;
          }
        }
        Segment::Literal(lit) => {
          if path.get(i) != Some(&lit.as_str()) {
            return false;
          }
        }
      }
      i += 1;
    }
    i == path.len()
  }
}

/// Ordered route table; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
  routes: Vec<Route>,
}

impl RouteTable {
  pub fn new(routes: &[RouteConfig]) -> Self {
    Self {
      routes: routes.iter().map(Route::parse).collect(),
    }
  }

  /// Entity type for a request path. Paths no route covers fall back to
  /// their first segment after an optional `api` prefix.
  pub fn entity_type(&self, path: &str) -> String {
    let segments: Vec<&str> = path_segments(path).collect();

    if let Some(route) = self.routes.iter().find(|r| r.matches(&segments)) {
      return route.entity_type.clone();
    }

    let fallback = segments
      .iter()
      .copied()
      .find(|s| *s != "api")
      .unwrap_or("unknown")
      .to_string();
    debug!(path, entity_type = %fallback, "No route matched, using path segment");
    fallback
  }
}

/// Non-empty path segments with any query string or fragment removed.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
  let end = path.find(['?', '#']).unwrap_or(path.len());
  path[..end].split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> RouteTable {
    RouteTable::new(&[
      RouteConfig {
        pattern: "/api/projects/:id/tasks/*".into(),
        entity_type: "tasks".into(),
      },
      RouteConfig {
        pattern: "/api/projects/*".into(),
        entity_type: "projects".into(),
      },
      RouteConfig {
        pattern: "/api/time-entries/:id".into(),
        entity_type: "timeEntries".into(),
      },
    ])
  }

  #[test]
  fn test_first_matching_route_wins() {
    let routes = table();
    assert_eq!(routes.entity_type("/api/projects/7/tasks/3"), "tasks");
    assert_eq!(routes.entity_type("/api/projects/7/tasks"), "tasks");
    assert_eq!(routes.entity_type("/api/projects/7"), "projects");
    assert_eq!(routes.entity_type("/api/projects"), "projects");
  }

  #[test]
  fn test_param_requires_segment() {
    let routes = table();
    assert_eq!(routes.entity_type("/api/time-entries/12"), "timeEntries");
    // No id -> pattern does not match, fallback applies
    assert_eq!(routes.entity_type("/api/time-entries"), "time-entries");
  }

  #[test]
  fn test_fallback_skips_api_prefix() {
    let routes = RouteTable::default();
    assert_eq!(routes.entity_type("/api/tasks/5"), "tasks");
    assert_eq!(routes.entity_type("/tasks/5"), "tasks");
    assert_eq!(routes.entity_type("/"), "unknown");
  }

  #[test]
  fn test_ignores_query_string() {
    let routes = table();
    assert_eq!(routes.entity_type("/api/time-entries/4?force=true"), "timeEntries");
  }
}
