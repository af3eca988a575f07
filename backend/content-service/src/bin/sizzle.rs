use anyhow::{bail, Context, Result};
use sizzle_content::auth::{AuthSessionManager, GoTrueClient};
use sizzle_content::db::{ContentRepository, PgStore};
use sizzle_content::media::{MediaUploader, S3ObjectStore};
use sizzle_content::models::FeedPost;
use sizzle_content::services::{CommentPolicy, CommentThread, FeedAggregator, PostComposer, PostDraft};
use sizzle_content::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Operator tool for the Sizzle content core.
///
/// - `feed [--tag NAME]...` prints the feed, filtered to posts carrying every tag
/// - `comments POST_ID` prints a post's comment thread
/// - `publish --title T --description D --ingredients I --recipe R --media PATH [--tag NAME]...`
///   signs in with SIZZLE_EMAIL / SIZZLE_PASSWORD and publishes a post
/// - `migrate` applies the bundled schema migrations
///
/// Env vars: see `Config::from_env`.
#[derive(Debug)]
enum Command {
    Feed { tags: Vec<String> },
    Comments { post_id: i64 },
    Publish { draft: PublishArgs },
    Migrate,
}

#[derive(Debug, Default)]
struct PublishArgs {
    title: String,
    description: String,
    ingredients: String,
    recipe: String,
    media: Option<PathBuf>,
    tags: Vec<String>,
}

fn take_value(args: &[String], i: usize, flag: &str) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .with_context(|| format!("{} requires a value", flag))
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.get(1) else {
        bail!("usage: sizzle <feed|comments|publish|migrate> [options]");
    };

    match command.as_str() {
        "feed" => {
            let mut tags = Vec::new();
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--tag" => {
                        tags.push(take_value(args, i, "--tag")?);
                        i += 2;
                    }
                    other => bail!("unknown feed option: {}", other),
                }
            }
            Ok(Command::Feed { tags })
        }
        "comments" => {
            let post_id = args
                .get(2)
                .context("comments requires a post id")?
                .parse()
                .context("invalid post id")?;
            Ok(Command::Comments { post_id })
        }
        "publish" => {
            let mut draft = PublishArgs::default();
            let mut i = 2;
            while i < args.len() {
                let flag = args[i].as_str();
                let value = take_value(args, i, flag)?;
                match flag {
                    "--title" => draft.title = value,
                    "--description" => draft.description = value,
                    "--ingredients" => draft.ingredients = value.replace("\\n", "\n"),
                    "--recipe" => draft.recipe = value.replace("\\n", "\n"),
                    "--media" => draft.media = Some(PathBuf::from(value)),
                    "--tag" => draft.tags.push(value),
                    other => bail!("unknown publish option: {}", other),
                }
                i += 2;
            }
            Ok(Command::Publish { draft })
        }
        "migrate" => Ok(Command::Migrate),
        other => bail!("unknown command: {}", other),
    }
}

fn print_post(post: &FeedPost) {
    println!(
        "#{} {} by {} [{}]",
        post.post.id,
        post.post.title,
        post.author.as_deref().unwrap_or("unknown"),
        post.tag_names().into_iter().collect::<Vec<_>>().join(", ")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sizzle_content=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    let config = Config::from_env()
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;
    info!(env = %config.app.env, "configuration loaded");

    let store = PgStore::connect(&config.database)
        .await
        .context("failed to connect to postgres")?;
    let repo = ContentRepository::new(Arc::new(store.clone()));

    match command {
        Command::Migrate => {
            store.migrate().await.context("migration failed")?;
            println!("migrations applied");
        }
        Command::Feed { tags } => {
            let mut feed = FeedAggregator::new(repo);
            feed.refresh().await?;
            feed.select_tags(tags);
            for post in feed.visible() {
                print_post(post);
            }
            println!(
                "{} of {} posts shown",
                feed.visible().len(),
                feed.all_posts().len()
            );
        }
        Command::Comments { post_id } => {
            let mut thread =
                CommentThread::with_policy(repo, post_id, CommentPolicy::from(&config.comments));
            for view in thread.load().await? {
                println!(
                    "{} {}: {}",
                    view.comment.created_at.format("%Y-%m-%d %H:%M"),
                    view.author.as_deref().unwrap_or("unknown"),
                    view.comment.content
                );
            }
        }
        Command::Publish { draft } => {
            let email = std::env::var("SIZZLE_EMAIL").context("SIZZLE_EMAIL must be set")?;
            let password =
                std::env::var("SIZZLE_PASSWORD").context("SIZZLE_PASSWORD must be set")?;

            let identity = GoTrueClient::new(&config.identity)?;
            let sessions = AuthSessionManager::new(Arc::new(identity), repo.clone());
            sessions.sign_in(&email, &password).await?;

            let objects = S3ObjectStore::connect(config.storage.s3.clone()).await;
            let uploader = MediaUploader::new(Arc::new(objects), config.storage.bucket.clone());

            let available = repo.fetch_tags().await?;
            let tags = available
                .into_iter()
                .filter(|tag| draft.tags.iter().any(|name| name.eq_ignore_ascii_case(&tag.name)))
                .collect();

            let mut composer = PostComposer::new(repo, uploader);
            let outcome = composer
                .submit(
                    &sessions.context(),
                    PostDraft {
                        title: draft.title,
                        description: draft.description,
                        ingredients: draft.ingredients,
                        recipe: draft.recipe,
                        media: draft.media,
                        tags,
                    },
                )
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", e.headline(), e))?;

            println!("published post #{} ({})", outcome.post.id, outcome.post.image_link);
            if let Some(err) = outcome.association_error {
                println!("warning: {}", err);
            }
            sessions.sign_out().await?;
        }
    }

    Ok(())
}
