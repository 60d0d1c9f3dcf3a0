/// Notices in-page navigation by comparing the page address against the one
/// last seen. Both the periodic poll and the page's own navigation events go
/// through [`NavigationCoordinator::check`], so a change is reported once.
#[derive(Debug)]
pub struct NavigationCoordinator {
  current_url: String,
}

impl NavigationCoordinator {
  pub fn new(url: &str) -> Self {
    Self {
      current_url: url.to_string(),
    }
  }

  pub fn current_url(&self) -> &str {
    &self.current_url
  }

  /// Returns the new address when it differs from the last one seen.
  pub fn check(&mut self, url: &str) -> Option<String> {
    if url == self.current_url {
      return None;
    }
    log::info!("navigation detected: {}", url);
    self.current_url = url.to_string();
    Some(self.current_url.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_change_is_reported_once() {
    let mut navigation = NavigationCoordinator::new("https://www.youtube.com/watch?v=1");
    assert_eq!(navigation.check("https://www.youtube.com/watch?v=1"), None);
    assert_eq!(
      navigation.check("https://www.youtube.com/watch?v=2").as_deref(),
      Some("https://www.youtube.com/watch?v=2")
    );
    assert_eq!(navigation.check("https://www.youtube.com/watch?v=2"), None);
    assert_eq!(navigation.current_url(), "https://www.youtube.com/watch?v=2");
  }
}
