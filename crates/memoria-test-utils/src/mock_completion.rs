// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock completion adapter for deterministic extraction tests.
//!
//! Responses are popped from a FIFO queue. When the queue is empty, `[]`
//! (an empty extraction result) is returned. Every prompt is recorded.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use memoria_core::{CompletionAdapter, MemoriaError};

pub struct MockCompletion {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletion {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Add a response to the end of the queue.
    pub fn add_response(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(text.into());
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CompletionAdapter for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, MemoriaError> {
        lock(&self.prompts).push(prompt.to_string());
        Ok(lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| "[]".to_string()))
    }
}
