//! Built-in scaffolding for the worker's dev server.
//!
//! Clients usually send only their source files; the worker image expects a
//! complete Vite project under `/app`. Any file in this fixed list that the
//! client did not supply is filled from the template below. Client-supplied
//! content always wins.

use std::collections::HashMap;

/// Placeholder substituted with the project id in templated entries.
const PROJECT_NAME_SLOT: &str = "__PROJECT_NAME__";

const PACKAGE_JSON: &str = r#"{
  "name": "__PROJECT_NAME__",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite --host 0.0.0.0 --port 4173"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.1",
    "typescript": "^5.5.3",
    "vite": "^5.4.0"
  }
}
"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from "vite";
import react from "@vitejs/plugin-react";

export default defineConfig({
  plugins: [react()],
  server: {
    host: "0.0.0.0",
    port: 4173,
    strictPort: true,
    hmr: { clientPort: 443 },
    watch: { usePolling: true, interval: 300 },
  },
});
"#;

const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "ES2020",
    "lib": ["ES2020", "DOM", "DOM.Iterable"],
    "module": "ESNext",
    "moduleResolution": "bundler",
    "jsx": "react-jsx",
    "strict": true,
    "noEmit": true,
    "skipLibCheck": true
  },
  "include": ["src"]
}
"#;

const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {},
};
"#;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>__PROJECT_NAME__</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>
"#;

const MAIN_TSX: &str = r#"import React from "react";
import ReactDOM from "react-dom/client";
import App from "./App";

ReactDOM.createRoot(document.getElementById("root")!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const APP_TSX: &str = r#"export default function App() {
  return <div>__PROJECT_NAME__</div>;
}
"#;

/// The fixed scaffold list, in the order files land on disk.
pub const SCAFFOLD_FILES: &[(&str, &str)] = &[
    ("package.json", PACKAGE_JSON),
    ("vite.config.ts", VITE_CONFIG),
    ("tsconfig.json", TSCONFIG),
    ("postcss.config.js", POSTCSS_CONFIG),
    ("index.html", INDEX_HTML),
    ("src/main.tsx", MAIN_TSX),
    ("src/App.tsx", APP_TSX),
];

/// Fill every scaffold file the client did not supply.
pub fn apply_scaffold(files: &mut HashMap<String, String>, project_id: &str) {
    for (path, template) in SCAFFOLD_FILES {
        if !files.contains_key(*path) {
            files.insert(
                path.to_string(),
                template.replace(PROJECT_NAME_SLOT, project_id),
            );
        }
    }
}
