//! Interactive driver that stands in for the UI collaborator: prompts for
//! a search, feeds it to the coordinator, and prints the event stream and
//! result summaries to the terminal.

use std::sync::Arc;

use anyhow::Error;
use console::{Term, style};
use dialoguer::{Confirm, Input, Select};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{info, warn};

use crate::booru::api::BooruApi;
use crate::booru::config::AppConfig;
use crate::booru::favorites::FavoriteStore;
use crate::booru::fetch::MediaFetchClient;
use crate::booru::media::video_handoff;
use crate::booru::post::{Rating, RatingPolicy, SharedPost};
use crate::booru::preview::PreviewScheduler;
use crate::booru::search::{SearchCoordinator, SearchRequest, UiEvent};
use crate::booru::site::{BooruSite, CredentialsProvider};
use crate::booru::transport::HttpTransport;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How many result summaries to print per page of output.
const SUMMARY_LIMIT: usize = 20;

/// Handles the flow of the browsing user experience.
pub(crate) struct Program {
    config: AppConfig,
}

impl Program {
    pub(crate) fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("booru manager");
        info!("{} v{}", NAME, VERSION);

        let transport = HttpTransport::new(&self.config.http)?;
        let api = Arc::new(BooruApi::new(
            transport.clone(),
            self.config.cache_config(),
        ));
        let favorites = Arc::new(FavoriteStore::new());
        let credentials = Arc::new(self.config.credentials_provider());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(MediaFetchClient::new(transport));
        let scheduler = Arc::new(PreviewScheduler::new(
            fetcher,
            self.config.scheduler_config(),
            events_tx.clone(),
        ));
        let coordinator = SearchCoordinator::new(
            api.clone(),
            scheduler.clone(),
            credentials.clone(),
            favorites,
            events_tx,
            self.config.search_config(),
        );

        spawn_event_printer(events_rx);
        self.check_credentials(&api, credentials.as_ref()).await;
        coordinator.hydrate_favorites().await;

        let default_page_size = self.config.search.page_size;
        loop {
            let Some(request) = task::spawn_blocking(move || prompt_request(default_page_size))
                .await??
            else {
                break;
            };

            coordinator.start_search(request).await;
            print_results(&coordinator.visible_posts());
            // Expedite what just landed on screen.
            coordinator.mark_visible_range(0, SUMMARY_LIMIT.saturating_sub(1));

            while coordinator.has_more() {
                let more = task::spawn_blocking(|| {
                    Confirm::new()
                        .with_prompt("Load more results?")
                        .default(false)
                        .interact()
                })
                .await??;
                if !more {
                    break;
                }
                coordinator.load_more().await;
                print_results(&coordinator.visible_posts());
            }

            let again = task::spawn_blocking(|| {
                Confirm::new()
                    .with_prompt("Start another search?")
                    .default(true)
                    .interact()
            })
            .await??;
            if !again {
                break;
            }
        }

        let (search_hits, search_misses, _, _) = api.cache_stats().snapshot();
        info!(search_hits, search_misses, "session finished");
        scheduler.shutdown();
        Ok(())
    }

    /// Probe each configured credential pair once at startup.
    async fn check_credentials(&self, api: &BooruApi, credentials: &dyn CredentialsProvider) {
        for site in BooruSite::ALL {
            let Some(creds) = credentials.credentials_for(site) else {
                continue;
            };
            if api.validate_credentials(site, &creds).await {
                info!(site = %site, "credentials accepted");
            } else {
                warn!(site = %site, "credentials rejected, continuing anonymously");
            }
        }
    }
}

fn spawn_event_printer(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    tokio::spawn(async move {
        let mut previews_loaded = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                UiEvent::Status(status) => println!("{}", style(status).dim()),
                UiEvent::Loading(_) => {}
                UiEvent::ResultsCleared => previews_loaded = 0,
                UiEvent::PostsAppended(_) => {}
                UiEvent::PreviewLoaded(_) => {
                    previews_loaded += 1;
                    if previews_loaded % 20 == 0 {
                        println!("{}", style(format!("{previews_loaded} previews loaded")).dim());
                    }
                }
            }
        }
    });
}

fn prompt_request(default_page_size: u32) -> Result<Option<SearchRequest>, dialoguer::Error> {
    let mut site_names: Vec<&str> = BooruSite::ALL.iter().map(|s| s.display_name()).collect();
    site_names.push("(quit)");
    let selection = Select::new()
        .with_prompt("Site")
        .items(&site_names)
        .default(0)
        .interact()?;
    let Some(&site) = BooruSite::ALL.get(selection) else {
        return Ok(None);
    };

    let tags: String = Input::new()
        .with_prompt("Tags")
        .allow_empty(true)
        .interact_text()?;

    let page_size: u32 = Input::new()
        .with_prompt("Results per page")
        .default(default_page_size)
        .interact_text()?;

    let rating = RatingPolicy {
        allow_safe: Confirm::new()
            .with_prompt("Include safe posts?")
            .default(true)
            .interact()?,
        allow_questionable: Confirm::new()
            .with_prompt("Include questionable posts?")
            .default(false)
            .interact()?,
        allow_adult: Confirm::new()
            .with_prompt("Include adult posts?")
            .default(false)
            .interact()?,
    };

    Ok(Some(SearchRequest {
        site,
        tags: tags.trim().to_string(),
        page_size: page_size.max(1),
        rating,
    }))
}

fn print_results(posts: &[SharedPost]) {
    for post in posts.iter().take(SUMMARY_LIMIT) {
        println!("  {}", summary_line(post));
        if let Some(handoff) = video_handoff(post) {
            let referer = handoff.referer.unwrap_or_default();
            println!(
                "    {}",
                style(format!("video -> {} (referer {referer})", handoff.url)).dim()
            );
        }
    }
    if posts.len() > SUMMARY_LIMIT {
        println!("  ... and {} more", posts.len() - SUMMARY_LIMIT);
    }
}

/// One-line post summary, e.g.
/// `GELBOORU | IMAGE | SAFE | 1920x1080px | #9000001 (score 15)`.
fn summary_line(post: &SharedPost) -> String {
    let details = post.details();
    let media = if post.is_video() { "VIDEO" } else { "IMAGE" };
    let rating = match details.rating {
        Rating::Safe => "SAFE",
        Rating::Questionable => "QUESTIONABLE",
        Rating::Adult => "ADULT",
        Rating::Unknown => "UNKNOWN",
    };
    let size = if details.width > 0 && details.height > 0 {
        format!(" | {}x{}px", details.width, details.height)
    } else {
        String::new()
    };
    let favorite = if post.is_favorite() { " *" } else { "" };

    format!(
        "{} | {} | {}{} | #{} (score {}){}",
        post.site().display_name().to_uppercase(),
        media,
        rating,
        size,
        post.id(),
        details.score,
        favorite
    )
}
