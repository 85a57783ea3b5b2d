use crate::embed::Embedding;
use crate::store::EnrolledFace;

/// Outcome of matching one query embedding against the store
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { name: String, similarity: f32 },
    Unmatched,
}

/// Compute cosine similarity between two L2-normalized embeddings
/// For normalized vectors, this is simply the dot product
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    a.dot(b)
}

/// Linear scan for the most similar enrolled face.
///
/// The best name is returned only when its similarity is strictly greater than
/// `threshold`. On exact ties the earlier store entry wins. Entries whose
/// dimension differs from the query are skipped.
pub fn best_match(query: &Embedding, faces: &[EnrolledFace], threshold: f32) -> MatchOutcome {
    let mut best: Option<(&EnrolledFace, f32)> = None;

    for face in faces {
        if face.embedding.len() != query.len() {
            log::debug!(
                "Skipping '{}': embedding dimension {} != {}",
                face.name,
                face.embedding.len(),
                query.len()
            );
            continue;
        }

        let similarity = cosine_similarity(query, &face.embedding);
        match best {
            Some((_, max)) if similarity <= max => {}
            _ => best = Some((face, similarity)),
        }
    }

    match best {
        Some((face, similarity)) if similarity > threshold => MatchOutcome::Matched {
            name: face.name.clone(),
            similarity,
        },
        Some((face, similarity)) => {
            log::debug!(
                "Best candidate '{}' at {:.3} is not above threshold {:.2}",
                face.name,
                similarity,
                threshold
            );
            MatchOutcome::Unmatched
        }
        None => MatchOutcome::Unmatched,
    }
}
