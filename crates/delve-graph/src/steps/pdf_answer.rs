use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use delve_core::error::{DelveError, Result};
use delve_core::types::{ChunkKind, ImageData};
use delve_index::ChunkIndex;
use delve_llm::Generator;

use super::{Collaborators, StepSettings};
use crate::prompts;
use crate::schema::{pdf_answer_schema, PdfAnswer};
use crate::state::{StepOutput, WorkflowState};

/// Extract, summarize, index, retrieve, answer.
///
/// Chunk summaries run with bounded concurrency and are all joined before
/// anything is indexed; one failed summary fails the step. An image is
/// indexed by its description, which also stands in for it in the answer
/// prompt.
pub(super) async fn run(
    state: &WorkflowState,
    deps: &Collaborators,
    settings: StepSettings,
) -> Result<StepOutput> {
    let path = state
        .pdf_path()
        .ok_or_else(|| DelveError::Graph("document step reached without a document".into()))?;

    let extraction = deps.pdf.extract(path).await?;
    info!(
        path,
        text = extraction.text_chunks.len(),
        tables = extraction.table_chunks.len(),
        images = extraction.image_chunks.len(),
        "Document extracted"
    );
    let concurrency = settings.summary_concurrency.max(1);
    let text_summaries = summarize(
        &deps.generator,
        &prompts::text_summary(),
        &extraction.text_chunks,
        concurrency,
    )
    .await?;
    let table_summaries = summarize(
        &deps.generator,
        &prompts::table_summary(),
        &extraction.table_chunks,
        concurrency,
    )
    .await?;
    let image_summaries = describe_images(
        &deps.generator,
        &prompts::image_summary(),
        &extraction.image_chunks,
        concurrency,
    )
    .await?;

    let mut index = ChunkIndex::new(deps.embedder.clone());
    index
        .add(ChunkKind::Text, extraction.text_chunks, text_summaries)
        .await?;
    index
        .add(ChunkKind::Table, extraction.table_chunks, table_summaries)
        .await?;
    index
        .add(ChunkKind::Image, image_summaries.clone(), image_summaries)
        .await?;

    let question = state.research_question();
    let chunks = index.retrieve(question, settings.top_k).await?;
    debug!(retrieved = chunks.len(), indexed = index.len(), "Chunks retrieved");

    let answer: PdfAnswer = deps
        .generator
        .generate_structured(
            &prompts::pdf_answer(&chunks),
            &prompts::question(question),
            &pdf_answer_schema(),
        )
        .await?;
    Ok(StepOutput::PdfAnswer(answer))
}

/// Summaries in the same order as `chunks`.
async fn summarize(
    generator: &Generator,
    system: &str,
    chunks: &[String],
    concurrency: usize,
) -> Result<Vec<String>> {
    stream::iter(chunks)
        .map(|chunk| generator.generate(system, chunk))
        .buffered(concurrency)
        .try_collect()
        .await
}

async fn describe_images(
    generator: &Generator,
    system: &str,
    images: &[String],
    concurrency: usize,
) -> Result<Vec<String>> {
    stream::iter(images)
        .map(|image| {
            generator.generate_with_image(
                system,
                prompts::IMAGE_SUMMARY_REQUEST,
                ImageData::from_base64(image.clone()),
            )
        })
        .buffered(concurrency)
        .try_collect()
        .await
}
