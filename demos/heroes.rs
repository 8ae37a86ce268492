//! Super heroes demo: a list query plus an optimistic "add hero" mutation
//! against an in-memory server that fails every other write.
//!
//! Run with `RUST_LOG=optimistic_query=debug cargo run --example heroes`.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use optimistic_query::prelude::*;
use optimistic_query::query::{Identified, Listing, append_optimistic};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hero {
    id: Option<u64>,
    name: String,
    alter_ego: String,
}

impl Identified for Hero {
    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

#[derive(Debug)]
enum Message {
    HeroAdded(Hero),
    AddFailed(QueryError),
}

/// In-memory system of record. Ids are assigned from 100 upwards so the
/// provisional ids used by optimistic writes are visibly replaced.
#[derive(Clone, Default)]
struct Server {
    heroes: Arc<Mutex<Vec<Hero>>>,
    writes: Arc<Mutex<u32>>,
}

impl Server {
    fn list(&self) -> BoxFuture<'static, Result<Listing<Hero>, QueryError>> {
        let heroes = self.heroes.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Listing::from(heroes.lock().await.clone()))
        }
        .boxed()
    }

    fn add(&self, mut hero: Hero) -> BoxFuture<'static, Result<Hero, QueryError>> {
        let heroes = self.heroes.clone();
        let writes = self.writes.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut writes = writes.lock().await;
            *writes += 1;
            if *writes % 2 == 0 {
                return Err(QueryError::NetworkError("server unavailable".to_string()));
            }

            let mut heroes = heroes.lock().await;
            hero.id = Some(100 + heroes.len() as u64);
            heroes.push(hero.clone());
            Ok(hero)
        }
        .boxed()
    }
}

fn render(result: &QueryResult<Listing<Hero>>) {
    match &result.state {
        QueryState::Idle => println!("  [heroes] idle"),
        QueryState::Loading => println!("  [heroes] loading..."),
        QueryState::Error(message) => println!("  [heroes] error: {message}"),
        QueryState::Success { data, is_stale } => {
            let names: Vec<String> = data
                .data
                .iter()
                .map(|h| format!("#{} {} ({})", h.id.unwrap_or_default(), h.name, h.alter_ego))
                .collect();
            let marker = if *is_stale { " (stale)" } else { "" };
            println!("  [heroes]{marker} {}", names.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::default();
    server.heroes.lock().await.push(Hero {
        id: Some(1),
        name: "Batman".to_string(),
        alter_ego: "Bruce Wayne".to_string(),
    });

    let client = Arc::new(QueryClient::new());
    let list_server = server.clone();
    let subscription = client.subscribe("super-heroes", move || list_server.list(), |result| {
        render(&result)
    });

    let save_server = server.clone();
    let add_hero = OptimisticMutation::new(
        "super-heroes",
        client.clone(),
        move |hero: Hero| save_server.add(hero),
        append_optimistic::<Hero>,
    );

    tokio::time::sleep(Duration::from_millis(200)).await;

    for (name, alter_ego) in [("Superman", "Clark Kent"), ("Wonder Woman", "Diana Prince")] {
        println!("adding {name}");
        let hero = Hero {
            id: None,
            name: name.to_string(),
            alter_ego: alter_ego.to_string(),
        };

        match add_hero.mutate(hero, Message::HeroAdded, Message::AddFailed) {
            Ok(cmd) => {
                for message in cmd.collect().await {
                    match message {
                        Message::HeroAdded(hero) => println!("  -> saved as #{:?}", hero.id),
                        Message::AddFailed(e) => println!("  -> rolled back: {e}"),
                    }
                }
            }
            Err(e) => println!("  -> rejected: {e}"),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    subscription.cancel().await;
    Ok(())
}
