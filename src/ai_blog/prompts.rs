use serde::Serialize;

use crate::config::LlmProvider;

const STYLE_RULES: &str = r#"The blog post should include:
1. An engaging title
2. Well-structured content with proper HTML styling:
   - Use heading tags (<h2>, <h3>) for section titles
   - Use paragraph tags (<p>) for text blocks
   - Use <strong> and <em> for emphasis
   - Create styled lists with <ul> and <ol> with proper <li> items
   - Include styled blockquotes using <blockquote> for important quotes
   - Add proper spacing between sections
   - Use <div class="info-box"> for important information
   - Use <div class="highlight-box"> for highlighting key points
   - Include <figure> with <img> and <figcaption> for images
   - Use <code> tags for code examples where relevant
3. A compelling meta description
4. Relevant keywords naturally incorporated throughout the text
5. Include 3-5 potential internal linking opportunities by emphasizing key topic phrases
   - Identify important topical phrases that could link to other blog posts
   - Don't create actual links, just identify good candidates for linking
   - The system will automatically create links post-generation"#;

const POST_SHAPE: &str = r#"{
    "title": "The blog post title",
    "content": "The full HTML content of the blog post with proper styling",
    "excerpt": "A brief summary of the blog post (150-160 characters)",
    "meta_title": "SEO-optimized title (50-60 characters)",
    "meta_description": "SEO-optimized description (150-160 characters)",
    "focus_keywords": "Primary keywords for the post, comma separated",
    "categories": ["Category1", "Category2"],
    "tags": ["Tag1", "Tag2", "Tag3"]
}"#;

const IDEAS_SYSTEM: &str = r#"You are an expert content strategist specializing in creating cohesive series of blog posts.
Your task is to create a list of related blog post ideas on a given topic.

Each blog post idea should:
1. Have a compelling, SEO-friendly title
2. Include a brief description (2-3 sentences) of what the post will cover
3. Be closely related to the main topic while covering different aspects
4. Together form a comprehensive series that builds reader knowledge

IMPORTANT: Your response must be ONLY a valid JSON array of objects with the following structure:
[
    {
        "title": "Compelling Blog Post Title",
        "description": "Brief description of what this post will cover and why it's valuable."
    }
]

DO NOT include any explanations, thinking process, or markdown outside the JSON.
Just return the raw JSON array."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Inputs for one post generation.
#[derive(Debug, Clone, Default)]
pub struct PostContext {
    pub topic: String,
    pub prompt: String,
    pub keywords: String,
    pub search_results: Vec<SearchResult>,
}

pub fn post_system_message(provider: LlmProvider) -> String {
    match provider {
        LlmProvider::Groq => format!(
            "You are an expert SEO content writer tasked with creating a high-quality blog post optimized for search engines.\n\n\
             VERY IMPORTANT: Your response MUST be a valid JSON object WITHOUT any <think> tags, markdown code blocks, or explanations.\n\n\
             {STYLE_RULES}\n\n\
             Respond ONLY with the following JSON format and nothing else:\n{POST_SHAPE}"
        ),
        LlmProvider::OpenAi => format!(
            "You are an expert SEO content writer. Your task is to create a high-quality blog post that is optimized for search engines.\n\
             {STYLE_RULES}\n\n\
             IMPORTANT: Your response must be ONLY a valid JSON object with the following fields:\n{POST_SHAPE}\n\n\
             DO NOT include any explanations, thinking process, or markdown code blocks before or after the JSON.\n\
             Just return the raw JSON object."
        ),
    }
}

pub fn post_user_message(context: &PostContext) -> String {
    let mut message = format!("Please write a blog post about: {}\n\n", context.topic);

    if !context.prompt.is_empty() {
        message.push_str(&format!("Additional instructions: {}\n\n", context.prompt));
    }
    if !context.keywords.is_empty() {
        message.push_str(&format!(
            "Please incorporate these keywords: {}\n\n",
            context.keywords
        ));
    }
    if !context.search_results.is_empty() {
        message.push_str("Here are some search results you can use as references:\n\n");
        for result in &context.search_results {
            message.push_str(&format!(
                "Title: {}\nURL: {}\nSnippet: {}\n\n",
                result.title, result.url, result.snippet
            ));
        }
    }

    message
}

pub fn ideas_system_message() -> &'static str {
    IDEAS_SYSTEM
}

pub fn ideas_user_message(topic: &str, description: &str, num_posts: i64) -> String {
    let mut message = format!(
        "Please create {} blog post ideas for a series about: {}\n\n",
        num_posts, topic
    );
    if !description.is_empty() {
        message.push_str(&format!("Series description: {}\n\n", description));
    }
    message.push_str(&format!(
        "These posts should form a cohesive series that thoroughly covers different aspects of {}.",
        topic
    ));
    message
}

/// Child request prompt for one idea of a batch series.
pub fn batch_child_prompt(batch_prompt: &str, batch_topic: &str, idea_description: &str) -> String {
    format!(
        "{}\n\nThis post is part of a series about {}.\n\nPost description: {}",
        batch_prompt, batch_topic, idea_description
    )
}

/// Placeholder search; no search backend is wired in.
pub fn search_web(query: &str) -> Vec<SearchResult> {
    vec![
        SearchResult {
            title: format!("Search result for: {}", query),
            url: "https://example.com/result1".to_string(),
            snippet: format!("This is a snippet of information about {}.", query),
        },
        SearchResult {
            title: format!("Another result for: {}", query),
            url: "https://example.com/result2".to_string(),
            snippet: format!("More information about {} and related topics.", query),
        },
    ]
}
