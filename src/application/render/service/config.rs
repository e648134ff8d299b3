use comrak::options::Options;

/// Comrak options shared by every render. Raw HTML passes through so plugin output and inline
/// markup in the source survive formatting.
pub fn default_options() -> Options<'static> {
    let mut options = Options::default();
    configure_extensions(&mut options);
    options
}

fn configure_extensions(options: &mut Options<'static>) {
    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.math_dollars = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.r#unsafe = true;
    render.sourcepos = false;
}
